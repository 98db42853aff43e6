//! End-to-end smoke tests live under `tests/`.
