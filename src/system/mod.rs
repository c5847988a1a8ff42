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

use std::{sync::Arc, time::Duration};

pub mod stoppable_task;
pub use stoppable_task::{StoppableTask, StoppableTaskPtr};

pub mod subscriber;
pub use subscriber::{Subscriber, SubscriberPtr, Subscription};

pub mod timeout;
pub use timeout::timeout;

/// Atomic pointer to the smol executor shared by every component.
/// The worker threads driving it are owned by the binary.
pub type ExecutorPtr = Arc<smol::Executor<'static>>;

/// Sleep for any number of seconds.
pub async fn sleep(seconds: u64) {
    smol::Timer::after(Duration::from_secs(seconds)).await;
}

/// Sleep for any number of milliseconds.
pub async fn msleep(millis: u64) {
    smol::Timer::after(Duration::from_millis(millis)).await;
}
