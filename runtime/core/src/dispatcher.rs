// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use {
    super::*,
    glib::{source, ControlFlow, MainContext, MainLoop, Source},
    nix::sys::signal,
    std::{sync::Arc, thread, time::Duration},
};

/// The thread to dispatch events in own main loop of glib.
pub struct Dispatcher {
    name: String,
    th: Option<thread::JoinHandle<()>>,
    ev_loop: Arc<MainLoop>,
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.ev_loop.quit();

        if let Some(th) = self.th.take() {
            if th.join().is_err() {
                tracing::debug!("Fail to join thread for {}.", self.name);
            }
        }
    }
}

const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(10);
const LAUNCH_POLL_COUNT: usize = 100;

impl Dispatcher {
    pub fn run(name: String) -> Result<Dispatcher, Error> {
        // Use own context.
        let ctx = MainContext::new();
        let ev_loop = Arc::new(MainLoop::new(Some(&ctx), false));

        // launch one thread to dispatch all events.
        let l = ev_loop.clone();
        let th = thread::Builder::new()
            .name(name.clone())
            .spawn(move || l.run())
            .map_err(|e| {
                let msg = format!("Fail to spawn thread for {}: {}", name, e);
                Error::new(glib::FileError::Failed, &msg)
            })?;

        let mut count = 0;
        while !ev_loop.is_running() {
            if count >= LAUNCH_POLL_COUNT {
                ev_loop.quit();
                let msg = format!("Event loop for {} is not launched", name);
                Err(Error::new(glib::FileError::Failed, &msg))?;
            }
            thread::sleep(LAUNCH_POLL_INTERVAL);
            count += 1;
        }

        let th = Some(th);
        Ok(Dispatcher { name, th, ev_loop })
    }

    pub fn stop(&mut self) {
        self.ev_loop.quit();
    }

    fn attach_src_to_ctx(&mut self, src: &Source) {
        let ctx = self.ev_loop.context();
        src.attach(Some(&ctx));
    }

    pub fn attach_signal_handler<F>(&mut self, signum: signal::Signal, cb: F)
    where
        F: FnMut() -> ControlFlow + Send + 'static,
    {
        let src =
            source::unix_signal_source_new(signum as i32, None, source::Priority::DEFAULT_IDLE, cb);

        self.attach_src_to_ctx(&src);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn run_and_stop() {
        let mut dispatcher = Dispatcher::run("test dispatcher".to_string()).unwrap();
        assert!(dispatcher.ev_loop.is_running());
        assert!(dispatcher.th.is_some());

        let ev_loop = dispatcher.ev_loop.clone();
        dispatcher.stop();
        drop(dispatcher);
        assert!(!ev_loop.is_running());
    }
}
