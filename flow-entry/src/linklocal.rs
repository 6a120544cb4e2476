// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Local port bindings for linklocal source NAT.
//!
//! A linklocal flow from a VM to a fabric service is source-NAT'd to a port of
//! the host. The port is reserved by binding a socket to it for the lifetime
//! of the flow. When the flow goes away the socket is not closed right away:
//! it ages in a queue so the port is not reused while the dataplane may still
//! carry packets for the old flow.

use crate::errors::LinkLocalError;
use ahash::RandomState;
use etherparse::IpNumber;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::net::{Ipv4Addr, TcpListener, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[allow(unused)]
use tracing::{debug, error, warn};

#[derive(Debug)]
enum PortSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl PortSocket {
    fn bind(protocol: IpNumber) -> Result<(Self, u16), LinkLocalError> {
        let any = (Ipv4Addr::UNSPECIFIED, 0);
        let socket = match protocol {
            IpNumber::TCP => PortSocket::Tcp(TcpListener::bind(any)?),
            IpNumber::UDP => PortSocket::Udp(UdpSocket::bind(any)?),
            other => return Err(LinkLocalError::UnsupportedProtocol(other.0)),
        };
        let port = match &socket {
            PortSocket::Tcp(s) => s.local_addr()?.port(),
            PortSocket::Udp(s) => s.local_addr()?.port(),
        };
        Ok((socket, port))
    }
}

#[derive(Debug)]
struct PortTable {
    per_vm: HashMap<Uuid, usize, RandomState>,
    total: usize,
    aging: VecDeque<(Instant, PortSocket)>,
}

impl PortTable {
    fn release(&mut self, vm: Uuid, socket: PortSocket, now: Instant) {
        if let Some(count) = self.per_vm.get_mut(&vm) {
            *count -= 1;
            if *count == 0 {
                self.per_vm.remove(&vm);
            }
        }
        self.total = self.total.saturating_sub(1);
        self.aging.push_back((now, socket));
    }
}

/// Handle to the shared port table. Cloning yields another handle to the same table.
#[derive(Clone)]
pub struct LinkLocalPorts {
    table: Arc<Mutex<PortTable>>,
    max_total: usize,
    max_per_vm: usize,
    aging_delay: Duration,
}

impl Debug for LinkLocalPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkLocalPorts")
            .field("max_total", &self.max_total)
            .field("max_per_vm", &self.max_per_vm)
            .field("aging_delay", &self.aging_delay)
            .finish_non_exhaustive()
    }
}

impl LinkLocalPorts {
    #[must_use]
    pub fn new(max_total: usize, max_per_vm: usize, aging_delay: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(PortTable {
                per_vm: HashMap::with_hasher(RandomState::with_seed(0)),
                total: 0,
                aging: VecDeque::new(),
            })),
            max_total,
            max_per_vm,
            aging_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PortTable> {
        // counters stay consistent even if a holder panicked
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a host port for a linklocal flow of `vm`
    pub fn allocate(&self, vm: Uuid, protocol: IpNumber) -> Result<LinkLocalBinding, LinkLocalError> {
        let mut table = self.lock();
        if table.total >= self.max_total {
            return Err(LinkLocalError::LimitReached(self.max_total));
        }
        let vm_count = table.per_vm.get(&vm).copied().unwrap_or(0);
        if vm_count >= self.max_per_vm {
            return Err(LinkLocalError::LimitReached(self.max_per_vm));
        }
        let (socket, port) = PortSocket::bind(protocol)?;
        *table.per_vm.entry(vm).or_insert(0) += 1;
        table.total += 1;
        debug!("Reserved linklocal port {port} for vm {vm}");
        Ok(LinkLocalBinding {
            vm,
            port,
            socket: Some(socket),
            ports: self.clone(),
        })
    }

    /// Number of live bindings of `vm`
    #[must_use]
    pub fn vm_count(&self, vm: &Uuid) -> usize {
        self.lock().per_vm.get(vm).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.lock().total
    }

    /// Number of released sockets waiting to be closed
    #[must_use]
    pub fn aging(&self) -> usize {
        self.lock().aging.len()
    }

    /// Close the released sockets older than the aging delay. Returns how many were closed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut table = self.lock();
        let mut closed = 0;
        while let Some((released, _)) = table.aging.front() {
            if now.saturating_duration_since(*released) < self.aging_delay {
                break;
            }
            table.aging.pop_front();
            closed += 1;
        }
        if closed > 0 {
            debug!("Closed {closed} aged linklocal sockets");
        }
        closed
    }
}

/// A port reserved for one linklocal flow. Moving the binding moves the
/// reservation; dropping it releases the port into the aging queue.
pub struct LinkLocalBinding {
    vm: Uuid,
    port: u16,
    socket: Option<PortSocket>,
    ports: LinkLocalPorts,
}

impl LinkLocalBinding {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn vm(&self) -> Uuid {
        self.vm
    }
}

impl Debug for LinkLocalBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkLocalBinding")
            .field("vm", &self.vm)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl Drop for LinkLocalBinding {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            self.ports.lock().release(self.vm, socket, Instant::now());
        }
    }
}
