/// Make any panic, including one in a spawned task, abort the process.
///
/// The previously installed hook runs first and prints the message and backtrace.
pub fn abort_on_panic() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        std::process::abort();
    }));
}
