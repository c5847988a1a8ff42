/* This file is part of Vesper
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

use std::sync::{Arc, Mutex};

use crate::{error::Result, Error};

use super::ExecutorPtr;

pub type StoppableTaskPtr = Arc<StoppableTask>;

/// A task that can be prematurely (and cooperatively) stopped at any moment.
///
/// ```ignore
/// let task = StoppableTask::new();
/// task.clone().start(
///     my_method(),
///     |result| self_.handle_stop(result),
///     Error::ServiceStopped,
///     executor,
/// );
/// ```
///
/// Then at any moment we can call `task.stop()` to close the task.
pub struct StoppableTask {
    signal: Mutex<Option<smol::channel::Sender<()>>>,
    task: Mutex<Option<smol::Task<()>>>,
}

impl StoppableTask {
    pub fn new() -> StoppableTaskPtr {
        Arc::new(Self { signal: Mutex::new(None), task: Mutex::new(None) })
    }

    /// Starts the task. `main` is the future being executed, while
    /// `stop_handler` is called exactly once when the future completes or
    /// the task is stopped, receiving either `main`'s result or
    /// `stop_value`.
    pub fn start<MainFut, StopFut, StopFn>(
        self: Arc<Self>,
        main: MainFut,
        stop_handler: StopFn,
        stop_value: Error,
        executor: ExecutorPtr,
    ) where
        MainFut: std::future::Future<Output = Result<()>> + Send + 'static,
        StopFut: std::future::Future<Output = ()> + Send + 'static,
        StopFn: FnOnce(Result<()>) -> StopFut + Send + 'static,
    {
        let (signal, shutdown) = smol::channel::bounded::<()>(1);

        if let Ok(mut guard) = self.signal.lock() {
            *guard = Some(signal);
        }

        let task = executor.spawn(async move {
            let stop_fut = async move {
                let _ = shutdown.recv().await;
                Err(stop_value)
            };

            let result = smol::future::or(main, stop_fut).await;
            stop_handler(result).await;
        });

        if let Ok(mut guard) = self.task.lock() {
            *guard = Some(task);
        }
    }

    /// Stops the task and waits until its stop handler has run.
    /// A no-op if the task was never started or has already been stopped.
    pub async fn stop(self: Arc<Self>) {
        let signal = match self.signal.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(signal) = signal {
            let _ = signal.send(()).await;
        }

        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(task) = task {
            task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn stop_invokes_handler_with_stop_value() {
        let executor = Arc::new(smol::Executor::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_ = stopped.clone();

        smol::block_on(executor.run(async {
            let task = StoppableTask::new();
            task.clone().start(
                async {
                    loop {
                        crate::system::sleep(3600).await;
                    }
                },
                move |result| async move {
                    assert!(matches!(result, Err(Error::ServiceStopped)));
                    stopped_.store(true, Ordering::SeqCst);
                },
                Error::ServiceStopped,
                executor.clone(),
            );

            task.stop().await;
            assert!(stopped.load(Ordering::SeqCst));
        }));
    }
}
