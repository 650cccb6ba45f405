/// Registers a panic hook that logs panics using the `tracing` crate
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = crate::version::build_info();

    tracing::debug!(
        build_profile = build.build_profile,
        version = build.version,
        "tessera starting up"
    );
}
