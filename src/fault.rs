//! Fail-fast halt for contract violations and operator-requested resets.
//!
//! A halt is not an error to be handled: it logs the location and message and
//! stops. With `panic = "abort"` (both shipped profiles) nothing unwinds and
//! nothing is scheduled afterwards; an external supervisor or the hardware
//! watchdog restarts the board.

use core::fmt;
use core::panic::Location;
use tracing::error;

/// Logs `message` with the caller's file and line, then stops.
#[track_caller]
#[cold]
pub fn halt(message: fmt::Arguments<'_>) -> ! {
    let location = Location::caller();
    error!(
        file = location.file(),
        line = location.line(),
        "FATAL: {}",
        message
    );
    panic!("halted at {}:{}: {}", location.file(), location.line(), message);
}

/// Stops the system with a formatted diagnostic.
#[macro_export]
macro_rules! halt {
    ($($arg:tt)+) => {
        $crate::fault::halt(format_args!($($arg)+))
    };
}

/// Stops the system unless `cond` holds.
#[macro_export]
macro_rules! halt_unless {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::halt!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    #[should_panic(expected = "queue depth was 0")]
    fn test_halt_reports_message() {
        let depth = 0;
        crate::halt_unless!(depth > 0, "queue depth was {}", depth);
    }

    #[test]
    fn test_halt_unless_passes_when_condition_holds() {
        crate::halt_unless!(1 + 1 == 2, "arithmetic");
    }
}
