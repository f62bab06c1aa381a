//! Test suites for the courier server.

mod support;
