// Test module entry point for sync tests
// Full-pipeline tests against an in-memory store and temp build dirs

mod common;

mod executor_tests;
mod orchestrator_tests;
mod reconcile_tests;
