/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{Future, FutureExt};
use log::debug;
use smol::channel;

use super::ExecutorPtr;
use crate::{Error, Result};

pub type StoppableTaskPtr = Arc<StoppableTask>;

/// A detached background task that can be told to stop.
pub struct StoppableTask {
    /// Used in logs
    name: &'static str,
    stop_send: channel::Sender<()>,
    stop_recv: channel::Receiver<()>,
    running: AtomicBool,
}

impl StoppableTask {
    pub fn new(name: &'static str) -> StoppableTaskPtr {
        let (stop_send, stop_recv) = channel::unbounded();
        Arc::new(Self { name, stop_send, stop_recv, running: AtomicBool::new(false) })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn `main` on `executor`. Once it returns, or `stop()` is called,
    /// `on_exit` receives the outcome. A stopped task reports
    /// [`Error::ServiceStopped`].
    pub fn start<MainFut, ExitFut, ExitFn>(
        self: Arc<Self>,
        main: MainFut,
        on_exit: ExitFn,
        executor: ExecutorPtr,
    ) where
        MainFut: Future<Output = Result<()>> + Send + 'static,
        ExitFut: Future<Output = ()> + Send + 'static,
        ExitFn: FnOnce(Result<()>) -> ExitFut + Send + 'static,
    {
        debug!(target: "system::stoppable_task::start()", "Starting {}", self.name);
        self.running.store(true, Ordering::SeqCst);

        executor
            .spawn(async move {
                let result = futures::select! {
                    _ = self.stop_recv.recv().fuse() => Err(Error::ServiceStopped),
                    result = main.fuse() => result
                };

                self.running.store(false, Ordering::SeqCst);
                debug!(
                    target: "system::stoppable_task::start()",
                    "{} exited: {:?}", self.name, result,
                );
                on_exit(result).await;
            })
            .detach();
    }

    pub async fn stop(&self) {
        if !self.is_running() {
            return
        }
        debug!(target: "system::stoppable_task::stop()", "Stopping {}", self.name);
        // The task may have exited on its own meanwhile
        let _ = self.stop_send.send(()).await;
    }
}
