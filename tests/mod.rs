mod support;

mod gateway_tests;
mod token_store_tests;
