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

use std::{collections::HashMap, sync::Arc};

use log::warn;
use rand::{rngs::OsRng, Rng};
use smol::{channel, lock::Mutex};

use crate::{Error, Result};

pub type SubscriberPtr<T> = Arc<Subscriber<T>>;

pub type SubscriptionId = u64;

pub struct Subscription<T> {
    id: SubscriptionId,
    recv_queue: channel::Receiver<T>,
    parent: SubscriberPtr<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn get_id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next published message.
    pub async fn receive(&self) -> Result<T> {
        self.recv_queue.recv().await.map_err(|_| Error::ServiceStopped)
    }

    /// Take a pending message without waiting, if there is one.
    pub fn try_receive(&self) -> Option<T> {
        self.recv_queue.try_recv().ok()
    }

    // Must be called manually since async Drop is not possible in Rust
    pub async fn unsubscribe(&self) {
        self.parent.clone().unsubscribe(self.id).await
    }
}

/// Simple broadcast (publish-subscribe) class
pub struct Subscriber<T> {
    subs: Mutex<HashMap<SubscriptionId, channel::Sender<T>>>,
}

impl<T: Clone> Subscriber<T> {
    pub fn new() -> SubscriberPtr<T> {
        Arc::new(Self { subs: Mutex::new(HashMap::new()) })
    }

    pub async fn subscribe(self: Arc<Self>) -> Subscription<T> {
        let (sender, recvr) = channel::unbounded();

        let mut subs = self.subs.lock().await;
        let mut sub_id: SubscriptionId = OsRng.gen();
        while subs.contains_key(&sub_id) {
            sub_id = OsRng.gen();
        }
        subs.insert(sub_id, sender);
        drop(subs);

        Subscription { id: sub_id, recv_queue: recvr, parent: self.clone() }
    }

    async fn unsubscribe(self: Arc<Self>, sub_id: SubscriptionId) {
        self.subs.lock().await.remove(&sub_id);
    }

    pub async fn notify(&self, message: T) {
        for sub in self.subs.lock().await.values() {
            if let Err(e) = sub.send(message.clone()).await {
                warn!(
                    target: "system::subscriber::notify()",
                    "Error returned sending message in notify() call! {}", e,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_unsubscribe() {
        smol::block_on(async {
            let subscriber = Subscriber::<u32>::new();
            let a = subscriber.clone().subscribe().await;
            let b = subscriber.clone().subscribe().await;
            assert_ne!(a.get_id(), b.get_id());

            subscriber.notify(7).await;
            assert_eq!(a.receive().await.unwrap(), 7);
            assert_eq!(b.receive().await.unwrap(), 7);

            b.unsubscribe().await;
            subscriber.notify(8).await;
            assert_eq!(a.receive().await.unwrap(), 8);
            assert!(b.try_receive().is_none());
        });
    }
}
