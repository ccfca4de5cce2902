//! Cross-module tests: end-to-end scenarios, pipeline properties and
//! persistence.

mod support;
