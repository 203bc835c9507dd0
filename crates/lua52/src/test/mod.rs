// Scenario tests: each builds a VM, opens the libraries and runs Lua code
mod test_basic;
mod test_chunks;
mod test_closures;
mod test_control_flow;
mod test_coroutine;
mod test_errors;
mod test_metamethods;
mod test_package;
mod test_string;
mod test_table;
