/// Progress reporting and cooperative cancellation for long-running work.
///
/// Reports arrive once per unit of work (frame, page, input file), never per
/// pixel. Cancellation is only checked between units.
pub trait Progress {
    fn report(&mut self, _done: usize, _total: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Ignores progress and never cancels.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Adapts a pair of closures to [`Progress`].
pub struct Callbacks<P, C> {
    pub on_progress: P,
    pub cancelled: C,
}

impl<P, C> Progress for Callbacks<P, C>
where
    P: FnMut(usize, usize),
    C: Fn() -> bool,
{
    fn report(&mut self, done: usize, total: usize) {
        (self.on_progress)(done, total)
    }

    fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn callbacks_forward() {
        let calls = Cell::new(0);
        let mut p = Callbacks {
            on_progress: |done: usize, total: usize| {
                assert!(done <= total);
                calls.set(calls.get() + 1);
            },
            cancelled: || calls.get() >= 2,
        };
        p.report(1, 3);
        assert!(!p.is_cancelled());
        p.report(2, 3);
        assert!(p.is_cancelled());
    }
}
