// src/kernel/mod.rs
//! カーネル抽象化
//!
//! [`Kernel`] は実行コアが必要とする協調オブジェクト（プロセステーブル、
//! フレームアリーナ、カーネル用ページテーブルのテンプレート、コンソール、
//! ランキュー）を所有し、トラップ経路からの 3 つの入口を提供します。
//!
//! - [`Kernel::dispatch`] - システムコール
//! - [`Kernel::page_fault`] - ページフォルト（COW 解決）
//! - [`Kernel::spawn`] - ELF イメージからのプロセス生成

use x86_64::structures::idt::PageFaultErrorCode;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::arch::x86_64::trap_frame::TrapFrame;
use crate::errors::PageFaultError;

pub mod driver;
pub mod mm;
pub mod process;
pub mod scheduler;
pub mod syscall;

use driver::console::Console;
use mm::{Frame, FrameArena, PageTable, Pte};
use process::{ElfImage, Process, ProcessId, ProcessTable};
use scheduler::RunQueue;

/// 実行コアのコンテキスト
#[derive(Debug)]
pub struct Kernel<C, S> {
    processes: ProcessTable,
    frames: FrameArena,
    kernel_space: PageTable,
    console: C,
    run_queue: S,
}

impl<C: Console, S: RunQueue> Kernel<C, S> {
    /// 指定したフレームアリーナ、コンソール、ランキューでカーネルを作成
    #[must_use]
    pub fn new(frames: FrameArena, console: C, run_queue: S) -> Self {
        Self {
            processes: ProcessTable::new(),
            frames,
            kernel_space: PageTable::new(),
            console,
            run_queue,
        }
    }

    /// カーネル専用マッピングをテンプレートに追加
    ///
    /// 以降に生成されるすべてのアドレス空間にコピーされます。
    /// `USER_ACCESSIBLE` は付与されません。
    pub fn map_kernel(&mut self, va: VirtAddr, pa: PhysAddr, flags: PageTableFlags) {
        let flags = (flags - PageTableFlags::USER_ACCESSIBLE) | PageTableFlags::PRESENT;
        *self.kernel_space.entry(va) = Pte::new(Frame::containing_address(pa), flags);
    }

    /// システムコールを処理
    ///
    /// # Panics
    ///
    /// `pid` が存在しない場合
    pub fn dispatch(&mut self, pid: ProcessId, tf: &mut TrapFrame) {
        syscall::dispatch(
            &mut self.processes,
            &self.frames,
            &mut self.console,
            &mut self.run_queue,
            pid,
            tf,
        );
    }

    /// ユーザー空間のページフォルトを処理
    ///
    /// COW ページへの書き込みであれば私有コピーを作成してプロセスを再開可能にし、
    /// それ以外はエラーを返します（プロセスを終了させるかは呼び出し元が判断）。
    ///
    /// # Panics
    ///
    /// `pid` が存在しない場合
    pub fn page_fault(
        &mut self,
        pid: ProcessId,
        fault_addr: VirtAddr,
        error_code: PageFaultErrorCode,
    ) -> Result<(), PageFaultError> {
        let Some(process) = self.processes.get_mut(pid) else {
            panic!("[PageFault] fault from unknown process PID={}", pid);
        };
        mm::handle_cow_fault(process, &self.frames, &mut self.run_queue, fault_addr, error_code)
    }

    /// ELF イメージから新しいプロセスを生成し、ランキューに追加
    ///
    /// プロセス名は `"<name>test"` になります。
    pub fn spawn(&mut self, name: &str, image: &ElfImage<'_>) -> ProcessId {
        process::spawn(
            &mut self.processes,
            &self.frames,
            &mut self.run_queue,
            &self.kernel_space,
            name,
            image,
        )
    }

    /// プロセスを取得
    #[must_use]
    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid)
    }

    /// プロセスを取得（可変）
    pub fn process_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(pid)
    }

    /// プロセステーブル
    #[must_use]
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// フレームアリーナ
    #[must_use]
    pub fn frames(&self) -> &FrameArena {
        &self.frames
    }

    /// カーネル用ページテーブルのテンプレート
    #[must_use]
    pub fn kernel_space(&self) -> &PageTable {
        &self.kernel_space
    }

    /// コンソール
    #[must_use]
    pub fn console(&self) -> &C {
        &self.console
    }

    /// コンソール（可変）
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    /// ランキュー
    #[must_use]
    pub fn run_queue(&self) -> &S {
        &self.run_queue
    }

    /// ランキュー（可変）
    pub fn run_queue_mut(&mut self) -> &mut S {
        &mut self.run_queue
    }
}
