// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Network protocol source
//!
//! One client at a time sends line commands over loopback TCP. Every
//! command gets exactly one `OK[:msg]` or `ERROR[:msg]` line back, except
//! a deferred return, whose answer is written once the screen changes or
//! its timeout passes. `done` (or a dropped connection) ends the session
//! and lets the next client connect; `quit` ends the source.

pub mod commands;
pub mod vars;
pub mod views;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::errors::NetworkError;
use crate::inject::DeviceControl;
use crate::parser::split_command_line;
use crate::source::EventSource;
use crate::types::Event;

pub use commands::{CommandContext, CommandReturn, Deferred, Dispatch};
pub use vars::VarTable;
pub use views::{NodeAction, NodeId, ViewHierarchy, ViewNode, ViewTree};

const DONE: &str = "done";
const QUIT: &str = "quit";

/// Screen change notifications from the view introspection side.
///
/// A counter is bumped on every change so a waiter never misses a change
/// that lands between issuing a command and starting to wait.
#[derive(Debug, Clone, Default)]
pub struct ScreenSignal {
    inner: Arc<ScreenSignalInner>,
}

#[derive(Debug, Default)]
struct ScreenSignalInner {
    changes: AtomicU64,
    notify: Notify,
}

impl ScreenSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports that the window content changed
    pub fn signal(&self) {
        self.inner.changes.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    fn changes(&self) -> u64 {
        self.inner.changes.load(Ordering::SeqCst)
    }

    /// Waits for a change after `seen`; returns false on timeout
    async fn wait_after(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.changes() != seen {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

struct PendingReturn {
    deferred: Deferred,
    seen: u64,
}

struct Session {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn reply(&mut self, outcome: &CommandReturn) -> Result<(), NetworkError> {
        self.writer
            .write_all(format!("{}\n", outcome).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }
}

pub struct NetworkSource {
    listener: TcpListener,
    session: Option<Session>,
    queue: VecDeque<Event>,
    pending: Option<PendingReturn>,
    device: Box<dyn DeviceControl>,
    views: Box<dyn ViewHierarchy>,
    vars: VarTable,
    screen: ScreenSignal,
    finished: bool,
    verbosity: u8,
}

impl NetworkSource {
    /// Binds the loopback port; port 0 picks a free one
    pub async fn bind(
        port: u16,
        device: Box<dyn DeviceControl>,
        views: Box<dyn ViewHierarchy>,
        vars: VarTable,
    ) -> Result<Self, NetworkError> {
        let address = SocketAddr::from(([127, 0, 0, 1], port));
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|e| NetworkError::BindFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self {
            listener,
            session: None,
            queue: VecDeque::new(),
            pending: None,
            device,
            views,
            vars,
            screen: ScreenSignal::new(),
            finished: false,
            verbosity: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for reporting screen changes to deferred returns
    pub fn screen_signal(&self) -> ScreenSignal {
        self.screen.clone()
    }

    async fn accept(&mut self) -> Result<(), NetworkError> {
        let (stream, peer) = self.listener.accept().await?;
        if self.verbosity > 0 {
            info!("Accepted protocol client {}", peer);
        }
        let (reader, writer) = stream.into_split();
        self.session = Some(Session {
            lines: BufReader::new(reader).lines(),
            writer,
        });

        if !self.device.wake() {
            warn!("Failed to wake device for new session");
        }
        Ok(())
    }

    async fn reply(&mut self, outcome: &CommandReturn) -> Result<(), NetworkError> {
        match self.session.as_mut() {
            Some(session) => session.reply(outcome).await,
            None => Ok(()),
        }
    }

    async fn read_line(&mut self) -> Result<Option<String>, NetworkError> {
        match self.session.as_mut() {
            Some(session) => Ok(session.lines.next_line().await?),
            None => Ok(None),
        }
    }

    async fn serve(&mut self) -> Result<Option<Event>, NetworkError> {
        if self.session.is_none() {
            self.accept().await?;
        }

        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(Some(event));
            }

            if let Some(pending) = self.pending.take() {
                debug!("Waiting for screen change");
                let changed = self
                    .screen
                    .wait_after(pending.seen, pending.deferred.timeout)
                    .await;
                if !changed {
                    debug!("Deferred return timed out");
                }
                self.reply(&pending.deferred.outcome).await?;
            }

            let line = match self.read_line().await? {
                Some(line) => line,
                None => {
                    debug!("Connection dropped");
                    DONE.to_string()
                }
            };
            let line = line.trim_end();

            if line == DONE {
                self.session = None;
                return Ok(Some(Event::Noop));
            }
            if line == QUIT {
                debug!("Quit requested");
                self.reply(&CommandReturn::ok()).await?;
                self.session = None;
                self.finished = true;
                return Ok(None);
            }
            if line.starts_with('#') {
                continue;
            }

            let parts = split_command_line(line);
            let mut ctx = CommandContext {
                queue: &mut self.queue,
                device: self.device.as_mut(),
                views: self.views.as_mut(),
                vars: &self.vars,
            };
            match commands::dispatch(&parts, &mut ctx) {
                Dispatch::Reply(outcome) => self.reply(&outcome).await?,
                Dispatch::Defer(deferred) => {
                    self.pending = Some(PendingReturn {
                        deferred,
                        seen: self.screen.changes(),
                    });
                    self.reply(&CommandReturn::ok()).await?;
                }
                Dispatch::Ignored => {}
            }
        }
    }
}

impl EventSource for NetworkSource {
    async fn next_event(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        match self.serve().await {
            Ok(event) => event,
            Err(e) => {
                error!("Protocol session failed: {}", e);
                self.session = None;
                None
            }
        }
    }

    fn validate(&mut self) -> bool {
        true
    }

    fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
    }
}
