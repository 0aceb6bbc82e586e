// Test modules for reachcheck
// Each module covers one component; `support` holds the local fakes

mod config_tests;
mod support;
