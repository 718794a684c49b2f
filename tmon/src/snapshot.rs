//! Machine state snapshots.
//!
//! A snapshot records the architectural state left behind by a run: hart,
//! interrupt devices, protection units, pending expectations and SRAM. User
//! callbacks and vector table overrides are code and are not captured.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::csr::{Level, Mode};
use crate::devices::aclint::NUM_HARTS;
use crate::devices::imsic::InterruptFile;
use crate::machine::{Machine, MachineConfig};
use crate::mpu::smpu::Region;
use crate::mpu::spmp::NUM_ENTRIES;
use crate::layout::{DATA_BASE, DATA_SIZE};
use crate::queue::{ExpectQueue, MIN_QUEUE_CAPACITY};

const SNAPSHOT_VERSION: &str = "1.1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HartSnapshot {
    pub pc: u64,
    pub mode: Mode,
    pub regs: [u64; 32],
    pub csrs: HashMap<u16, u64>,
    pub iprio_m: Vec<u8>,
    pub iprio_s: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImsicSnapshot {
    pub eip: u64,
    pub eie: u64,
    pub eidelivery: u64,
    pub eithreshold: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub msip: [u32; NUM_HARTS],
    pub ssip: [u32; NUM_HARTS],
    pub imsic_m: ImsicSnapshot,
    pub imsic_s: ImsicSnapshot,
}

/// Region tables as `(addr, conf)` pairs plus enable masks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpuSnapshot {
    pub l1: Vec<(u64, u64)>,
    pub l1_mask: u64,
    pub l2: Vec<(u64, u64)>,
    pub l2_mask: u64,
    pub spmp_cfg: Vec<u8>,
    pub spmp_addr: Vec<u64>,
    pub spmp_switch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub queue_capacity: usize,
    /// Expectations still queued, head first.
    pub pending: Vec<u64>,
    pub nesting_m: Vec<u16>,
    pub nesting_s: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemRegionSnapshot {
    pub base: u64,
    pub size: u64,
    pub hash: String,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub steps: u64,
    pub hart: HartSnapshot,
    pub devices: DeviceSnapshot,
    pub mpu: MpuSnapshot,
    pub monitor: MonitorSnapshot,
    /// Next free byte of the static data area.
    pub data_top: u64,
    pub console: Vec<String>,
    pub memory: Vec<MemRegionSnapshot>,
}

impl From<&InterruptFile> for ImsicSnapshot {
    fn from(file: &InterruptFile) -> Self {
        Self {
            eip: file.eip,
            eie: file.eie,
            eidelivery: file.eidelivery,
            eithreshold: file.eithreshold,
        }
    }
}

impl ImsicSnapshot {
    fn restore(&self, file: &mut InterruptFile) {
        file.eip = self.eip;
        file.eie = self.eie;
        file.eidelivery = self.eidelivery;
        file.eithreshold = self.eithreshold;
    }
}

fn hash_of(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn region_pairs(regions: &[Region]) -> Vec<(u64, u64)> {
    regions.iter().map(|r| (r.addr, r.conf)).collect()
}

fn restore_regions(regions: &mut [Region], pairs: &[(u64, u64)]) {
    for (region, &(addr, conf)) in regions.iter_mut().zip(pairs) {
        *region = Region { addr, conf };
    }
}

impl Snapshot {
    /// Human-readable digest, one line per item.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = vec![
            format!("snapshot v{} after {} steps", self.version, self.steps),
            format!("  pc: {:#x}; mode: {}", self.hart.pc, self.hart.mode.name()),
            format!(
                "  msip: {}; ssip: {}; meip: {:#x}; seip: {:#x}",
                self.devices.msip[0], self.devices.ssip[0], self.devices.imsic_m.eip, self.devices.imsic_s.eip
            ),
            format!(
                "  smpumask: {:#x}; hmpumask: {:#x}; spmpswitch: {:#x}",
                self.mpu.l1_mask, self.mpu.l2_mask, self.mpu.spmp_switch
            ),
            format!("  pending expectations: {:?}", self.monitor.pending),
        ];
        for region in &self.memory {
            lines.push(format!(
                "  memory {:#x}+{:#x} sha256 {}",
                region.base, region.size, region.hash
            ));
        }
        lines
    }
}

impl Machine {
    /// Capture the current machine state.
    pub fn snapshot(&self) -> Snapshot {
        let hart = HartSnapshot {
            pc: self.hart.pc,
            mode: self.hart.mode,
            regs: self.hart.regs,
            csrs: self.hart.export_csrs(),
            iprio_m: self.hart.iprio_table(Level::Machine).to_vec(),
            iprio_s: self.hart.iprio_table(Level::Supervisor).to_vec(),
        };

        let devices = DeviceSnapshot {
            msip: self.bus.aclint.msip,
            ssip: self.bus.aclint.ssip,
            imsic_m: (&self.bus.imsic_m).into(),
            imsic_s: (&self.bus.imsic_s).into(),
        };

        let prot = &self.hart.mpu;
        let mpu = MpuSnapshot {
            l1: region_pairs(&prot.l1.regions),
            l1_mask: prot.l1.mask,
            l2: region_pairs(&prot.l2.regions),
            l2_mask: prot.l2.mask,
            spmp_cfg: prot.spmp.cfg.to_vec(),
            spmp_addr: prot.spmp.addr.to_vec(),
            spmp_switch: prot.spmp.switch,
        };

        let monitor = MonitorSnapshot {
            queue_capacity: self.monitor.queue.capacity(),
            pending: self.monitor.queue.pending(),
            nesting_m: self.monitor.m.nesting.clone(),
            nesting_s: self.monitor.s.nesting.clone(),
        };

        let sram = &self.bus.sram;
        let region = MemRegionSnapshot {
            base: sram.base,
            size: sram.size(),
            hash: hash_of(&sram.data),
            data: Some(sram.data.clone()),
        };

        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            steps: self.steps(),
            hart,
            devices,
            mpu,
            monitor,
            data_top: self.data_top(),
            console: self.console.lines().to_vec(),
            memory: vec![region],
        }
    }

    /// Restore state from a previously captured snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), String> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(format!(
                "snapshot version mismatch: expected {}, found {}",
                SNAPSHOT_VERSION, snapshot.version
            ));
        }

        let region = snapshot
            .memory
            .first()
            .ok_or_else(|| "snapshot missing SRAM region".to_string())?;
        let data = region
            .data
            .as_ref()
            .ok_or_else(|| "snapshot SRAM region has no inline data".to_string())?;
        if self.bus.sram.base != region.base || self.bus.sram.data.len() != data.len() {
            return Err(format!(
                "snapshot SRAM layout mismatch: machine={:#x}+{:#x}, snapshot={:#x}+{:#x}",
                self.bus.sram.base,
                self.bus.sram.size(),
                region.base,
                data.len()
            ));
        }
        if hash_of(data) != region.hash {
            return Err(format!("snapshot SRAM hash mismatch for base {:#x}", region.base));
        }
        if snapshot.mpu.spmp_cfg.len() != NUM_ENTRIES || snapshot.mpu.spmp_addr.len() != NUM_ENTRIES {
            return Err("snapshot SPMP table has the wrong number of entries".to_string());
        }
        if !(DATA_BASE..=DATA_BASE + DATA_SIZE).contains(&snapshot.data_top) {
            return Err(format!("snapshot data area top {:#x} is out of range", snapshot.data_top));
        }
        if snapshot.monitor.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(format!(
                "snapshot queue capacity {} is below {}",
                snapshot.monitor.queue_capacity, MIN_QUEUE_CAPACITY
            ));
        }
        let mut queue = ExpectQueue::new(snapshot.monitor.queue_capacity);
        for &id in &snapshot.monitor.pending {
            queue.append(id).map_err(|e| format!("snapshot expectations do not fit: {}", e))?;
        }

        // validated; nothing below can fail

        self.hart.pc = snapshot.hart.pc;
        self.hart.mode = snapshot.hart.mode;
        self.hart.regs = snapshot.hart.regs;
        self.hart.import_csrs(&snapshot.hart.csrs);
        self.hart.set_iprio_table(Level::Machine, &snapshot.hart.iprio_m);
        self.hart.set_iprio_table(Level::Supervisor, &snapshot.hart.iprio_s);

        self.bus.aclint.msip = snapshot.devices.msip;
        self.bus.aclint.ssip = snapshot.devices.ssip;
        snapshot.devices.imsic_m.restore(&mut self.bus.imsic_m);
        snapshot.devices.imsic_s.restore(&mut self.bus.imsic_s);

        let prot = &mut self.hart.mpu;
        restore_regions(&mut prot.l1.regions, &snapshot.mpu.l1);
        prot.l1.mask = snapshot.mpu.l1_mask;
        restore_regions(&mut prot.l2.regions, &snapshot.mpu.l2);
        prot.l2.mask = snapshot.mpu.l2_mask;
        prot.spmp.cfg.copy_from_slice(&snapshot.mpu.spmp_cfg);
        prot.spmp.addr.copy_from_slice(&snapshot.mpu.spmp_addr);
        prot.spmp.switch = snapshot.mpu.spmp_switch;

        self.monitor.queue = queue;
        self.monitor.m.nesting = snapshot.monitor.nesting_m.clone();
        self.monitor.s.nesting = snapshot.monitor.nesting_s.clone();

        self.console.drain();
        for line in &snapshot.console {
            self.console.print(line.clone());
        }

        self.bus.sram.data.clone_from_slice(data);
        self.set_data_top(snapshot.data_top);
        Ok(())
    }

    /// Construct a machine from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, String> {
        let region = snapshot
            .memory
            .first()
            .ok_or_else(|| "snapshot missing SRAM region".to_string())?;
        let sram_size = region
            .size
            .try_into()
            .map_err(|_| "snapshot SRAM size does not fit in usize".to_string())?;

        let mut machine = Machine::new(MachineConfig {
            queue_capacity: snapshot.monitor.queue_capacity,
            sram_size,
            ..MachineConfig::default()
        });
        machine.apply_snapshot(snapshot)?;
        Ok(machine)
    }

    /// Save a snapshot to disk using bincode.
    pub fn save_snapshot_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let snap = self.snapshot();
        let mut file = File::create(path)?;
        bincode::serialize_into(&mut file, &snap)?;
        file.flush()?;
        Ok(())
    }
}

/// Load a snapshot from disk.
pub fn load_snapshot_from_path<P: AsRef<Path>>(path: P) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let mut file = File::open(path)?;
    let snapshot: Snapshot = bincode::deserialize_from(&mut file)?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::IRQ_MSI;
    use crate::monitor::api;
    use crate::mpu::smpu::ATTR_W;

    #[test]
    fn snapshot_roundtrip_preserves_state() {
        let mut m = Machine::default();
        m.hart.mpu.l1.regions[3] = Region::protected(0x1_0000, 0x1_0000, ATTR_W);
        m.hart.mpu.l1.mask = 1 << 3;
        m.hart.mpu.spmp.cfg[7] = 0x9B;
        m.bus.imsic_s.eip = 1 << 5;
        m.write_words(0x2_0000, &[0x0123_4567_89ab_cdef]).unwrap();

        let status = m.run(|m| {
            api::maj_priority(m, Level::Machine, IRQ_MSI, 9)?;
            m.expect(13)?;
            m.expect(15)?;
            m.print("before snapshot");
            m.exit(0)
        });
        assert_eq!(status, 0);

        let snap = m.snapshot();
        let bytes = bincode::serialize(&snap).unwrap();
        let snap2: Snapshot = bincode::deserialize(&bytes).unwrap();
        let m2 = Machine::from_snapshot(&snap2).unwrap();

        assert_eq!(m.hart.pc, m2.hart.pc);
        assert_eq!(m.hart.mode, m2.hart.mode);
        assert_eq!(m2.hart.iprio(Level::Machine, IRQ_MSI), 9);
        assert_eq!(m2.hart.mpu.l1.regions[3], m.hart.mpu.l1.regions[3]);
        assert_eq!(m2.hart.mpu.l1.mask, 1 << 3);
        assert_eq!(m2.hart.mpu.spmp.cfg[7], 0x9B);
        assert_eq!(m2.bus.imsic_s.eip, 1 << 5);
        assert_eq!(m2.monitor.queue.pending(), vec![13, 15]);
        assert!(m2.console.contains("before snapshot"));
        assert_eq!(m.bus.sram.data, m2.bus.sram.data);
        assert_eq!(m2.read_word(0x2_0000).unwrap(), 0x0123_4567_89ab_cdef);
        assert!(snap.summary().iter().any(|l| l.contains("pending expectations: [13, 15]")));
    }

    #[test]
    fn overfull_queue_leaves_machine_untouched() {
        let mut m = Machine::default();
        let status = m.run(|m| {
            m.expect(13)?;
            m.expect(15)?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        let mut snap = m.snapshot();
        snap.monitor.queue_capacity = 2;
        snap.hart.pc = 0xdead_0000;

        let mut target = Machine::default();
        let pc = target.hart.pc;
        assert!(target.apply_snapshot(&snap).is_err());
        assert_eq!(target.hart.pc, pc);
        assert!(target.monitor.queue.is_empty());
    }

    #[test]
    fn data_area_top_survives_restore() {
        fn noop(_: &mut Machine, _: &mut crate::frame::TrapFrame) -> Result<(), crate::Halt> {
            Ok(())
        }
        let mut m = Machine::default();
        assert_eq!(m.run(|m| m.link_callback(3, Some(noop))), 0);
        assert!(m.data_top() > DATA_BASE);

        let m2 = Machine::from_snapshot(&m.snapshot()).unwrap();
        assert_eq!(m2.data_top(), m.data_top());

        let mut snap = m.snapshot();
        snap.data_top = DATA_BASE + DATA_SIZE + 8;
        assert!(Machine::from_snapshot(&snap).is_err());
    }

    #[test]
    fn corrupted_memory_is_rejected() {
        let m = Machine::default();
        let mut snap = m.snapshot();
        if let Some(data) = snap.memory[0].data.as_mut() {
            data[0] ^= 0xFF;
        }
        assert!(Machine::from_snapshot(&snap).is_err());
    }
}
