//! Composable cancellation contexts
//!
//! Every blocking point in the transport consults a [`CancelContext`] after
//! each non-progressing syscall. Contexts compose by wrapping: each node
//! carries an optional parent, and a parent firing cancels the whole chain
//! with reason [`CancelReason::CancelByParent`]. The concrete condition a
//! node watches (deadline, interrupt flag, OS error, TLS error) is a variant
//! of a tagged union rather than a virtual-dispatch hierarchy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a blocking operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// No cancellation has fired.
    NotCanceled,
    /// A parent context cancelled; query [`CancelContext::deep_reason`] for
    /// the root cause.
    CancelByParent,
    /// The operation would block and the context is configured to cancel
    /// instead of waiting.
    Blocking,
    /// The last syscall reported a non-retryable OS error.
    OsError,
    /// The TLS session reported a fatal error.
    SslError,
    /// The deadline passed.
    Timeout,
    /// Another thread raised the interrupt flag.
    Interrupt,
    /// Unconditional cancellation at the first suspension.
    MustCancel,
    /// Reason could not be determined.
    Unknown,
}

/// What the TLS layer observed at the last non-progressing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslIssue {
    /// No TLS session involved, or the session is healthy.
    #[default]
    None,
    /// The session wants another read/write; retry.
    WantRetry,
    /// The failure came from the underlying socket; defer to the OS error.
    Syscall,
    /// Fatal TLS failure; the session is unusable.
    Fatal,
}

/// Snapshot of the last non-progressing syscall, fed to
/// [`CancelContext::on_cancel`] at each blocking point.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockEvent {
    /// Raw OS error number, 0 if none.
    pub os_err: i32,
    /// The syscall reported EWOULDBLOCK/EAGAIN.
    pub would_block: bool,
    /// TLS session state, if the transport is secure.
    pub ssl: SslIssue,
}

impl BlockEvent {
    /// No error observed; the caller is merely between poll ticks.
    pub fn idle() -> Self {
        BlockEvent::default()
    }

    /// The syscall would block.
    pub fn blocked() -> Self {
        BlockEvent {
            would_block: true,
            ..BlockEvent::default()
        }
    }

    /// Snapshot from an `io::Error`.
    pub fn os(err: &std::io::Error) -> Self {
        BlockEvent {
            os_err: err.raw_os_error().unwrap_or(0),
            would_block: err.kind() == std::io::ErrorKind::WouldBlock,
            ssl: SslIssue::None,
        }
    }

    /// Fatal TLS failure.
    pub fn ssl_fatal() -> Self {
        BlockEvent {
            ssl: SslIssue::Fatal,
            ..BlockEvent::default()
        }
    }
}

#[derive(Debug)]
enum Kind {
    /// Plain composition node; cancels only through its parent.
    Plain,
    OsError {
        cancel_when_block: bool,
    },
    SslError {
        cancel_when_block: bool,
    },
    Timeout {
        deadline: Instant,
    },
    Interrupt {
        flag: Arc<AtomicBool>,
    },
    MustCancel,
}

/// A node in the cancellation tree.
///
/// Query with [`on_cancel`](Self::on_cancel) at each blocking point; once it
/// returns `true` the context stays cancelled and [`reason`](Self::reason)
/// reports why.
#[derive(Debug)]
pub struct CancelContext {
    kind: Kind,
    parent: Option<Box<CancelContext>>,
    canceled: bool,
    reason: CancelReason,
}

impl CancelContext {
    fn with_kind(kind: Kind) -> Self {
        CancelContext {
            kind,
            parent: None,
            canceled: false,
            reason: CancelReason::NotCanceled,
        }
    }

    /// Plain node that only relays parent cancellation.
    pub fn new() -> Self {
        Self::with_kind(Kind::Plain)
    }

    /// Cancels when `timeout` has elapsed from now.
    pub fn timeout(timeout: Duration) -> Self {
        Self::with_kind(Kind::Timeout {
            deadline: Instant::now() + timeout,
        })
    }

    /// Cancels when `flag` becomes true; the flag may be set from another
    /// thread, or through [`cancel`](Self::cancel).
    pub fn interrupt(flag: Arc<AtomicBool>) -> Self {
        Self::with_kind(Kind::Interrupt { flag })
    }

    /// Watches the OS error of the last syscall. With `cancel_when_block`,
    /// EWOULDBLOCK/EAGAIN cancels with [`CancelReason::Blocking`] instead of
    /// being retried.
    pub fn os_error(cancel_when_block: bool) -> Self {
        Self::with_kind(Kind::OsError { cancel_when_block })
    }

    /// Watches the TLS session state; `want_read`/`want_write` keep
    /// retrying, fatal failures cancel with [`CancelReason::SslError`].
    pub fn ssl_error(cancel_when_block: bool) -> Self {
        Self::with_kind(Kind::SslError { cancel_when_block })
    }

    /// Cancels unconditionally at the first suspension. Used for strictly
    /// non-blocking polls.
    pub fn must_cancel() -> Self {
        Self::with_kind(Kind::MustCancel)
    }

    /// Wrap this context under `parent`; the parent is checked first.
    pub fn with_parent(mut self, parent: CancelContext) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Whether cancellation applies at the current blocking point.
    ///
    /// Parents are consulted first; a firing parent is adopted as
    /// [`CancelReason::CancelByParent`]. Once cancelled, subsequent calls
    /// keep returning `true`.
    pub fn on_cancel(&mut self, ev: &BlockEvent) -> bool {
        if self.canceled {
            return true;
        }
        if let Some(parent) = self.parent.as_deref_mut() {
            if parent.on_cancel(ev) {
                self.canceled = true;
                self.reason = CancelReason::CancelByParent;
                return true;
            }
        }
        let fired = match &self.kind {
            Kind::Plain => None,
            Kind::OsError { cancel_when_block } => os_check(ev, *cancel_when_block),
            Kind::SslError { cancel_when_block } => match ev.ssl {
                SslIssue::None | SslIssue::WantRetry => None,
                SslIssue::Syscall => os_check(ev, *cancel_when_block),
                SslIssue::Fatal => Some(CancelReason::SslError),
            },
            Kind::Timeout { deadline } => {
                if Instant::now() >= *deadline {
                    Some(CancelReason::Timeout)
                } else {
                    None
                }
            }
            Kind::Interrupt { flag } => {
                if flag.load(Ordering::Relaxed) {
                    Some(CancelReason::Interrupt)
                } else {
                    None
                }
            }
            Kind::MustCancel => Some(CancelReason::MustCancel),
        };
        if let Some(reason) = fired {
            self.canceled = true;
            self.reason = reason;
        }
        self.canceled
    }

    /// Request cancellation from outside the blocking point.
    ///
    /// Only deadline and interrupt nodes are externally cancellable; other
    /// variants return `false` and are unaffected.
    pub fn cancel(&mut self) -> bool {
        match &mut self.kind {
            Kind::Timeout { deadline } => {
                *deadline = Instant::now();
                true
            }
            Kind::Interrupt { flag } => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Whether the caller should keep blocking.
    pub fn wait(&self) -> bool {
        !self.canceled
    }

    /// Reason recorded at this node.
    pub fn reason(&self) -> CancelReason {
        self.reason
    }

    /// Root-cause reason, following `CancelByParent` links upward.
    pub fn deep_reason(&self) -> CancelReason {
        if self.reason == CancelReason::CancelByParent {
            if let Some(parent) = self.parent.as_deref() {
                return parent.deep_reason();
            }
            return CancelReason::Unknown;
        }
        self.reason
    }
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::new()
    }
}

fn os_check(ev: &BlockEvent, cancel_when_block: bool) -> Option<CancelReason> {
    if ev.would_block {
        if cancel_when_block {
            return Some(CancelReason::Blocking);
        }
        return None;
    }
    if ev.os_err != 0 {
        return Some(CancelReason::OsError);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_fires() {
        let mut ctx = CancelContext::timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.on_cancel(&BlockEvent::idle()));
        assert_eq!(ctx.reason(), CancelReason::Timeout);
        assert!(!ctx.wait());
    }

    #[test]
    fn test_timeout_not_elapsed() {
        let mut ctx = CancelContext::timeout(Duration::from_secs(60));
        assert!(!ctx.on_cancel(&BlockEvent::idle()));
        assert_eq!(ctx.reason(), CancelReason::NotCanceled);
        assert!(ctx.wait());
    }

    #[test]
    fn test_interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut ctx = CancelContext::interrupt(flag.clone());
        assert!(!ctx.on_cancel(&BlockEvent::idle()));

        flag.store(true, Ordering::Relaxed);
        assert!(ctx.on_cancel(&BlockEvent::idle()));
        assert_eq!(ctx.reason(), CancelReason::Interrupt);
    }

    #[test]
    fn test_cancel_zeroes_deadline() {
        let mut ctx = CancelContext::timeout(Duration::from_secs(60));
        assert!(ctx.cancel());
        assert!(ctx.on_cancel(&BlockEvent::idle()));
        assert_eq!(ctx.reason(), CancelReason::Timeout);
    }

    #[test]
    fn test_parent_adoption_and_deep_reason() {
        let parent = CancelContext::timeout(Duration::from_millis(0));
        let mut child = CancelContext::os_error(false).with_parent(parent);
        std::thread::sleep(Duration::from_millis(5));
        assert!(child.on_cancel(&BlockEvent::idle()));
        assert_eq!(child.reason(), CancelReason::CancelByParent);
        assert_eq!(child.deep_reason(), CancelReason::Timeout);
    }

    #[test]
    fn test_os_error_blocking_modes() {
        let mut waiting = CancelContext::os_error(false);
        assert!(!waiting.on_cancel(&BlockEvent::blocked()));

        let mut nonblocking = CancelContext::os_error(true);
        assert!(nonblocking.on_cancel(&BlockEvent::blocked()));
        assert_eq!(nonblocking.reason(), CancelReason::Blocking);

        let mut hard = CancelContext::os_error(false);
        let ev = BlockEvent {
            os_err: libc::ECONNRESET,
            would_block: false,
            ssl: SslIssue::None,
        };
        assert!(hard.on_cancel(&ev));
        assert_eq!(hard.reason(), CancelReason::OsError);
    }

    #[test]
    fn test_ssl_error_variants() {
        let mut ctx = CancelContext::ssl_error(false);
        let retry = BlockEvent {
            ssl: SslIssue::WantRetry,
            ..BlockEvent::default()
        };
        assert!(!ctx.on_cancel(&retry));
        assert!(ctx.on_cancel(&BlockEvent::ssl_fatal()));
        assert_eq!(ctx.reason(), CancelReason::SslError);
    }

    #[test]
    fn test_must_cancel() {
        let mut ctx = CancelContext::must_cancel();
        assert!(ctx.on_cancel(&BlockEvent::idle()));
        assert_eq!(ctx.reason(), CancelReason::MustCancel);
    }

    #[test]
    fn test_cancel_is_sticky() {
        let mut ctx = CancelContext::timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.on_cancel(&BlockEvent::idle()));
        // Later calls keep reporting cancelled even if the event is clean.
        assert!(ctx.on_cancel(&BlockEvent::idle()));
    }
}
