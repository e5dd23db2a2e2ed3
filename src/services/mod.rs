pub mod belief_state;
pub mod coverage_analyzer;
pub mod diagnostic_selector;
pub mod prerequisite_graph;
