//! End-to-end smoke tests for the bridge live under `tests/`.
