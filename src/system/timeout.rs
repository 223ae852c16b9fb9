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

//! Deadlines for futures that wait on other tasks, such as acquiring a
//! contract somebody else holds.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use pin_project_lite::pin_project;
use smol::Timer;

/// The deadline passed before the future completed
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

pin_project! {
    /// Future returned by [`timeout`]
    pub struct Deadline<F> {
        #[pin]
        inner: F,
        #[pin]
        timer: Timer,
    }
}

/// Run `future` for at most `dur`. When the deadline wins, `future` is
/// dropped without being polled again, so a lock it was queued on is
/// never taken.
pub fn timeout<F: Future>(dur: Duration, future: F) -> Deadline<F> {
    Deadline { inner: future, timer: Timer::after(dur) }
}

impl<F: Future> Future for Deadline<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // The inner future goes first so work finishing right at the
        // deadline still counts.
        if let Poll::Ready(v) = this.inner.poll(cx) {
            return Poll::Ready(Ok(v))
        }

        match this.timer.poll(cx) {
            Poll::Ready(_) => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
