//! Flow-control windows
//!
//! One signed 31-bit window type used at both the connection and stream
//! level. Send windows are consumed by outbound DATA and widened by peer
//! WINDOW_UPDATE frames; receive windows shrink as DATA arrives and the
//! engine replenishes them once they fall below half of the initial size.

use super::error::{Error, Result};
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Maximum window size (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// A flow-control window. The current size may go negative when the peer
/// shrinks the initial size under already-committed data.
#[derive(Debug, Clone)]
pub struct Window {
    initial: u32,
    size: i64,
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Window {
            initial,
            size: initial as i64,
        }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Take up to `want` bytes from the window, returning what was granted.
    pub fn consume(&mut self, want: usize) -> usize {
        let granted = (want as i64).min(self.size).max(0) as usize;
        self.size -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment. Zero increments and overflow past
    /// 2^31-1 are protocol violations.
    pub fn widen(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "WINDOW_UPDATE increment must be non-zero".to_string(),
            ));
        }
        let new_size = self.size + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "window size {} exceeds 2^31-1",
                new_size
            )));
        }
        self.size = new_size;
        Ok(self.size)
    }

    /// Shrink the window for received payload.
    pub fn narrow(&mut self, amount: usize) {
        self.size -= amount as i64;
    }

    /// Retroactively apply a changed SETTINGS_INITIAL_WINDOW_SIZE: the
    /// delta lands on the current size.
    pub fn set_initial(&mut self, new_initial: u32) -> Result<()> {
        let delta = new_initial as i64 - self.initial as i64;
        let new_size = self.size + delta;
        if new_size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!(
                "window size {} exceeds 2^31-1",
                new_size
            )));
        }
        self.initial = new_initial;
        self.size = new_size;
        Ok(())
    }

    /// On the receive side: how much to hand back via WINDOW_UPDATE when
    /// the window has fallen below half of its initial size.
    pub fn replenish_amount(&self) -> Option<u32> {
        let initial = self.initial as i64;
        if self.size < initial / 2 {
            Some((initial - self.size) as u32)
        } else {
            None
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::new(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_partial() {
        let mut window = Window::new(100);
        assert_eq!(window.consume(60), 60);
        assert_eq!(window.size(), 40);
        assert_eq!(window.consume(60), 40);
        assert_eq!(window.size(), 0);
        assert_eq!(window.consume(10), 0);
    }

    #[test]
    fn test_widen() {
        let mut window = Window::new(100);
        window.consume(100);
        window.widen(50).unwrap();
        assert_eq!(window.size(), 50);
    }

    #[test]
    fn test_widen_zero_is_protocol_error() {
        let mut window = Window::new(100);
        assert!(matches!(window.widen(0), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_widen_overflow() {
        let mut window = Window::new(0x7FFF_FFFF);
        assert!(matches!(window.widen(1), Err(Error::FlowControl(_))));
    }

    #[test]
    fn test_narrow_can_go_negative() {
        let mut window = Window::new(10);
        window.narrow(25);
        assert_eq!(window.size(), -15);
        assert_eq!(window.available(), 0);
    }

    #[test]
    fn test_set_initial_applies_delta() {
        let mut window = Window::new(100);
        window.consume(50);

        window.set_initial(200).unwrap();
        assert_eq!(window.initial(), 200);
        assert_eq!(window.size(), 150);

        window.set_initial(150).unwrap();
        assert_eq!(window.size(), 100);
    }

    #[test]
    fn test_replenish_threshold() {
        let mut window = Window::new(100);
        window.narrow(40);
        assert_eq!(window.replenish_amount(), None);
        window.narrow(20);
        assert_eq!(window.replenish_amount(), Some(60));
    }

    #[test]
    fn test_default_initial() {
        let window = Window::default();
        assert_eq!(window.size(), DEFAULT_INITIAL_WINDOW_SIZE as i64);
    }
}
