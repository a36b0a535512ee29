//! In-process API tests over fake storage. Coverage that needs a live
//! PostgreSQL instance lives in the `tests/` directory instead.

mod realtime_api;
