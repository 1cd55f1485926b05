// src/kernel/process/mod.rs
//! Process management module
//!
//! A process here is an address space plus the bookkeeping the execution
//! core needs: which physical pages the process holds a reference to, its
//! name for diagnostics, and whether it is still alive.

use alloc::collections::BTreeMap;
use alloc::string::String;
use x86_64::VirtAddr;
use x86_64::structures::paging::PageTableFlags;

use crate::arch::x86_64::tlb;
use crate::config::PAGE_SIZE;
use crate::errors::MapError;
use crate::kernel::mm::{Frame, FrameArena, PageTable, Pte};

pub mod binary_reader;
pub mod elf_loader;
pub mod fork;
pub mod lifecycle;

pub use elf_loader::{ElfImage, ProgramHeader, SegmentFlags};
pub use fork::sys_fork;
pub use lifecycle::spawn;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// Create a new process ID
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is ready to run
    Ready,
    /// Process is inside a trap handler
    Running,
    /// Process has terminated and awaits reaping
    Terminated,
}

/// What a tracked page is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageUse {
    /// Backing a loaded ELF segment
    Segment,
    /// User stack
    Stack,
    /// Private copy made by the COW fault path
    Private,
}

/// Tracking record for one physical page held by a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    /// Page classification
    pub usage: PageUse,
}

/// Process control block
#[derive(Debug)]
pub struct Process {
    pid: ProcessId,
    name: String,
    state: ProcessState,
    table: PageTable,
    /// Every physical page this process holds a frame reference to
    pages: BTreeMap<Frame, PageRecord>,
    parent_pid: Option<ProcessId>,
    exit_status: Option<i64>,
}

impl Process {
    /// Create a process with an empty address space.
    #[must_use]
    pub fn new(pid: ProcessId, name: String) -> Self {
        Self::with_table(pid, name, PageTable::new())
    }

    /// Create a process around an existing table root.
    #[must_use]
    pub fn with_table(pid: ProcessId, name: String, table: PageTable) -> Self {
        Self {
            pid,
            name,
            state: ProcessState::Ready,
            table,
            pages: BTreeMap::new(),
            parent_pid: None,
            exit_status: None,
        }
    }

    /// Process ID
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Diagnostic name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Set state
    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    /// Whether the process has terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state == ProcessState::Terminated
    }

    /// Get parent PID
    #[must_use]
    pub const fn parent_pid(&self) -> Option<ProcessId> {
        self.parent_pid
    }

    /// Set parent PID
    pub fn set_parent_pid(&mut self, pid: ProcessId) {
        self.parent_pid = Some(pid);
    }

    /// Exit status passed to `exit`, once terminated
    #[must_use]
    pub const fn exit_status(&self) -> Option<i64> {
        self.exit_status
    }

    /// Record the exit status and mark the process terminated
    pub fn terminate(&mut self, status: i64) {
        self.exit_status = Some(status);
        self.state = ProcessState::Terminated;
    }

    /// The page table root owned by this process
    #[must_use]
    pub fn table(&self) -> &PageTable {
        &self.table
    }

    /// Mutable access to the page table root
    pub fn table_mut(&mut self) -> &mut PageTable {
        &mut self.table
    }

    /// Tracking record for `frame`, if this process holds it
    #[must_use]
    pub fn page_record(&self, frame: Frame) -> Option<&PageRecord> {
        self.pages.get(&frame)
    }

    /// Every tracked page
    pub fn tracked_pages(&self) -> impl Iterator<Item = (Frame, &PageRecord)> + '_ {
        self.pages.iter().map(|(frame, record)| (*frame, record))
    }

    /// Allocate a zeroed page and register it in the tracking map.
    ///
    /// Returns `None` when physical memory is exhausted.
    pub fn alloc_page(&mut self, frames: &FrameArena, usage: PageUse) -> Option<Frame> {
        let frame = frames.allocate_zeroed()?;
        self.pages.insert(frame, PageRecord { usage });
        Some(frame)
    }

    /// Take an additional reference on a page already held by another process.
    pub fn share_page(&mut self, frames: &FrameArena, frame: Frame, record: PageRecord) {
        frames.add_reference(frame);
        if let Some(previous) = self.pages.insert(frame, record) {
            // Already held: keep a single reference per tracked page.
            frames.release(frame);
            log::debug!(
                "[Process] PID={} already tracked {:#x} as {:?}",
                self.pid,
                frame.start_address().as_u64(),
                previous.usage
            );
        }
    }

    /// Drop a page from the tracking map and release its frame reference.
    ///
    /// Returns `false` if the page was not tracked.
    pub fn release_page(&mut self, frames: &FrameArena, frame: Frame) -> bool {
        if self.pages.remove(&frame).is_none() {
            return false;
        }
        frames.release(frame);
        true
    }

    /// Install `frame` at `va` with `perms` (PRESENT is implied).
    ///
    /// Off the first-install path, replacing a present mapping invalidates
    /// the stale TLB entry. Returns the entry that was replaced, if any.
    pub fn page_insert(
        &mut self,
        frames: &FrameArena,
        va: VirtAddr,
        frame: Frame,
        perms: PageTableFlags,
        first_install: bool,
    ) -> Result<Option<Pte>, MapError> {
        if va.as_u64() % PAGE_SIZE != 0 {
            return Err(MapError::UnalignedVirtual(va.as_u64()));
        }
        if !frames.is_live(frame) {
            return Err(MapError::UnknownFrame(frame.start_address().as_u64()));
        }

        let slot = self.table.entry(va);
        let old = *slot;
        *slot = Pte::new(frame, perms | PageTableFlags::PRESENT);

        if !old.is_present() {
            return Ok(None);
        }
        if !first_install {
            tlb::invalidate(va);
        }
        Ok(Some(old))
    }

    /// Whether every user-accessible mapping refers to a tracked page.
    #[must_use]
    pub fn tracks_all_user_pages(&self) -> bool {
        self.table
            .mappings()
            .iter()
            .filter(|(_, pte)| pte.is_user())
            .all(|(_, pte)| self.pages.contains_key(&pte.frame()))
    }

    /// Whether some user-accessible entry of this process still maps `frame`
    #[must_use]
    pub fn maps_user_frame(&self, frame: Frame) -> bool {
        self.table
            .mappings()
            .iter()
            .any(|(_, pte)| pte.is_user() && pte.frame() == frame)
    }
}

/// Process table - every live process, keyed by PID
#[derive(Debug)]
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Process>,
    next_pid: u64,
}

impl ProcessTable {
    /// Create a new empty process table
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
            next_pid: 1, // PID 0 is reserved for the kernel
        }
    }

    /// Allocate a new process ID
    pub fn allocate_pid(&mut self) -> ProcessId {
        let pid = ProcessId::new(self.next_pid);
        self.next_pid += 1;
        pid
    }

    /// Create a detached process record with a fresh PID.
    ///
    /// The record becomes visible to lookups once passed to [`insert`](Self::insert).
    pub fn create(&mut self, name: String) -> Process {
        Process::new(self.allocate_pid(), name)
    }

    /// Add a process to the table
    pub fn insert(&mut self, process: Process) -> ProcessId {
        let pid = process.pid();
        self.processes.insert(pid, process);
        pid
    }

    /// Get a process by ID
    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Get a mutable process by ID
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Whether `pid` is live
    #[must_use]
    pub fn contains(&self, pid: ProcessId) -> bool {
        self.processes.contains_key(&pid)
    }

    /// Number of live processes
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Remove a process and release every page it tracks.
    pub fn reap(&mut self, pid: ProcessId, frames: &FrameArena) -> Option<Process> {
        let mut process = self.processes.remove(&pid)?;
        for (frame, _) in core::mem::take(&mut process.pages) {
            frames.release(frame);
        }
        log::info!("[Process] Reaped PID={} ({})", pid, process.name());
        Some(process)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
