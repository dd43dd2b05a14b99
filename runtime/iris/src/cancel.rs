// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    glib::Error,
    iris_protocols::ModeSwitchError,
    std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    },
};

/// The token to abort poll loops, shared between threads.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// The clone shares the flag, and expires after the timeout.
    pub fn with_deadline(&self, timeout: Duration) -> Self {
        Self {
            flag: self.flag.clone(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::new(ModeSwitchError::Cancelled, "Operation is cancelled"))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shared_flag() {
        let token = Cancellation::default();
        let child = token.with_deadline(Duration::from_secs(60));
        assert!(child.check().is_ok());

        token.cancel();
        assert!(child.is_cancelled());
        let err = child.check().unwrap_err();
        assert_eq!(err.kind::<ModeSwitchError>(), Some(ModeSwitchError::Cancelled));
    }

    #[test]
    fn expired_deadline() {
        let token = Cancellation::default().with_deadline(Duration::from_millis(0));
        assert!(token.is_cancelled());
        assert!(!Cancellation::default().is_cancelled());
    }
}
