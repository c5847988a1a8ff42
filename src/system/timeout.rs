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

use std::{future::Future, time::Duration};

use crate::{error::Result, Error};

/// Run `future` to completion, or fail with `Error::ChannelTimeout` once
/// `dur` has elapsed.
pub async fn timeout<T, F>(dur: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timeout_fut = async {
        smol::Timer::after(dur).await;
        Err(Error::ChannelTimeout)
    };

    smol::future::or(future, timeout_fut).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires() {
        smol::block_on(async {
            let slow = async {
                smol::Timer::after(Duration::from_secs(10)).await;
                Ok(())
            };
            let result = timeout(Duration::from_millis(10), slow).await;
            assert!(matches!(result, Err(Error::ChannelTimeout)));
        });
    }

    #[test]
    fn passes_result_through() {
        smol::block_on(async {
            let quick = async { Ok(42u8) };
            assert_eq!(timeout(Duration::from_secs(5), quick).await.unwrap(), 42);
        });
    }
}
