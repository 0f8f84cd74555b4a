/// Initializes the tracing/logging infrastructure for the host process.
///
/// Structured logging via the `tracing` crate with environment-based filtering:
/// set `RUST_LOG` to control verbosity, e.g. `RUST_LOG=info`,
/// `RUST_LOG=dispatch_engine=debug`.
///
/// Call once at process start, before building the engine. The default
/// [`ImmediateTracingObserver`](crate::observer::ImmediateTracingObserver) mirrors
/// every system event onto this stream.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
