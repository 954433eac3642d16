// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process shutdown.
//!
//! The [`ShutdownCoordinator`] hands a [`Shutdown`] to every long-lived task
//! (accept loop, reaper). Each task listens on it and holds it until it exits;
//! the coordinator learns that everyone is done when the last one is dropped.

use tokio::sync::{broadcast, mpsc};

#[derive(Debug)]
pub struct ShutdownCoordinator {
    notify: broadcast::Sender<()>,
    complete_tx: mpsc::Sender<()>,
    complete_rx: mpsc::Receiver<()>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        ShutdownCoordinator::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> ShutdownCoordinator {
        let (notify, _) = broadcast::channel(1);
        let (complete_tx, complete_rx) = mpsc::channel(1);
        ShutdownCoordinator {
            notify,
            complete_tx,
            complete_rx,
        }
    }

    /// A listener for one task. Only sees signals sent after this call.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify: self.notify.subscribe(),
            _complete_tx: self.complete_tx.clone(),
        }
    }

    pub fn trigger(&self) {
        // no receivers just means nobody is listening anymore
        let _ = self.notify.send(());
    }

    /// Waits until every [`Shutdown`] handed out has been dropped.
    pub async fn wait_complete(self) {
        let ShutdownCoordinator {
            notify,
            complete_tx,
            mut complete_rx,
        } = self;
        drop(complete_tx);
        let _ = complete_rx.recv().await;
        drop(notify);
    }
}

/// One task's view of the shutdown signal.
#[derive(Debug)]
pub struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
    _complete_tx: mpsc::Sender<()>,
}

impl Shutdown {
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Resolves once the signal is sent or the coordinator is gone.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
