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

use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll, Waker},
};

/// Condition variable which allows any number of tasks to block until
/// woken up. Once notified it stays awake, so late waiters return at once.
#[derive(Default)]
pub struct CondVar {
    state: Mutex<CondVarState>,
}

#[derive(Default)]
struct CondVarState {
    is_awake: bool,
    wakers: Vec<Waker>,
}

impl CondVar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakeup all waiting tasks.
    pub fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.is_awake = true;
        for waker in state.wakers.drain(..) {
            waker.wake()
        }
    }

    /// Wait for a notification. Returns immediately if already notified.
    pub fn wait(&self) -> CondVarWait {
        CondVarWait { state: &self.state }
    }

    pub fn is_awake(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).is_awake
    }
}

pub struct CondVarWait<'a> {
    state: &'a Mutex<CondVarState>,
}

impl Future for CondVarWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_awake {
            return Poll::Ready(())
        }

        // Avoid registering the same task twice.
        let cx_waker = cx.waker();
        if !state.wakers.iter().any(|w| w.will_wake(cx_waker)) {
            state.wakers.push(cx_waker.clone());
        }

        Poll::Pending
    }
}
