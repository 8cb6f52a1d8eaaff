/// Lifecycle hooks driven by the host's subsystem framework.
pub trait Subsystem {
    fn name(&self) -> &'static str;

    /// Bring the subsystem up. Returns false if it could not start.
    fn on_initialize(&self) -> bool;

    /// Release everything acquired in `on_initialize`. Returns false if the
    /// subsystem was not running.
    fn on_terminate(&self) -> bool;
}
