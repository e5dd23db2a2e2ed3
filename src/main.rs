use danci_mastery_core::config::Config;
use danci_mastery_core::logging::init_tracing;
use danci_mastery_core::MasteryCore;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let course_id = std::env::args().nth(1);

    let core = match MasteryCore::from_config(&config).await {
        Ok(core) => core,
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize mastery core");
            std::process::exit(1);
        }
    };

    match core.load_graph(course_id.as_deref()).await {
        Ok(stats) => match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize graph statistics"),
        },
        Err(err) => {
            tracing::error!(error = %err, "failed to load prerequisite graph");
            std::process::exit(1);
        }
    }
}
