#![allow(dead_code)]

use anyhow::Result;
use overseer::platform::lock::InstanceLock;
use overseer::platform::supervisor::{ChildExit, ManagedChild, ProcessLauncher, ProcessSpec};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct World {
    next_pid: u32,
    launches: HashMap<String, u32>,
    live: HashMap<String, Arc<Mutex<Option<ChildExit>>>>,
    terminations: Vec<String>,
    stale: Option<InstanceLock>,
    stubborn: bool,
    stale_signals: Vec<(u32, bool)>,
}

/// In-memory launcher: children are exit slots the test fills in.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    world: Arc<Mutex<World>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launches(&self, name: &str) -> u32 {
        self.world
            .lock()
            .unwrap()
            .launches
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Make the current child of `name` exit with `exit`.
    pub fn exit(&self, name: &str, exit: ChildExit) {
        let world = self.world.lock().unwrap();
        let slot = world.live.get(name).expect("process was never launched");
        *slot.lock().unwrap() = Some(exit);
    }

    pub fn crash(&self, name: &str) {
        self.exit(name, ChildExit::Signalled);
    }

    pub fn terminations(&self) -> Vec<String> {
        self.world.lock().unwrap().terminations.clone()
    }

    /// Stand in for an orphan from an earlier run. It releases `lock` on
    /// SIGTERM, or only on SIGKILL when `stubborn`.
    pub fn hold_stale(&self, lock: InstanceLock, stubborn: bool) {
        let mut world = self.world.lock().unwrap();
        world.stale = Some(lock);
        world.stubborn = stubborn;
    }

    /// `(pid, force)` for every stale-instance signal sent.
    pub fn stale_signals(&self) -> Vec<(u32, bool)> {
        self.world.lock().unwrap().stale_signals.clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &ProcessSpec) -> Result<Box<dyn ManagedChild>> {
        let mut world = self.world.lock().unwrap();
        world.next_pid += 1;
        *world.launches.entry(spec.name.clone()).or_default() += 1;
        let slot = Arc::new(Mutex::new(None));
        world.live.insert(spec.name.clone(), Arc::clone(&slot));
        Ok(Box::new(FakeChild {
            name: spec.name.clone(),
            pid: 10_000 + world.next_pid,
            slot,
            world: Arc::clone(&self.world),
        }))
    }

    fn signal_stale(&self, pid: u32, force: bool) -> Result<()> {
        let mut world = self.world.lock().unwrap();
        world.stale_signals.push((pid, force));
        if force || !world.stubborn {
            world.stale = None;
        }
        Ok(())
    }
}

struct FakeChild {
    name: String,
    pid: u32,
    slot: Arc<Mutex<Option<ChildExit>>>,
    world: Arc<Mutex<World>>,
}

impl ManagedChild for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        Ok(*self.slot.lock().unwrap())
    }

    fn terminate(&mut self) -> Result<()> {
        self.world.lock().unwrap().terminations.push(self.name.clone());
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(ChildExit::Success);
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(ChildExit::Signalled);
        }
        Ok(())
    }
}
