// src/kernel/mm/frame.rs
//! 物理フレーム管理
//!
//! 固定容量のフレームアリーナ。各フレームは実際の 4KiB バッファを持ち、
//! 参照カウントで共有（COW）を管理します。

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::fmt;
use spin::Mutex;
use x86_64::PhysAddr;
use x86_64::structures::paging::{PhysFrame, Size4KiB};

use crate::config::{DEFAULT_FRAME_LIMIT, FRAME_BASE, PAGE_SIZE};

/// 物理フレーム
pub type Frame = PhysFrame<Size4KiB>;

/// フレームの中身
pub type FrameData = [u8; PAGE_SIZE as usize];

struct ArenaInner {
    /// スロットごとのページ内容（未使用なら `None`）
    slots: Vec<Option<Box<FrameData>>>,
    /// 解放されたスロットのリスト（再利用可能）
    free_slots: VecDeque<usize>,
    /// フレームの参照カウント
    references: BTreeMap<Frame, usize>,
    limit: usize,
}

impl ArenaInner {
    fn slot_of(&self, frame: Frame) -> Option<usize> {
        let addr = frame.start_address().as_u64();
        let index = usize::try_from(addr.checked_sub(FRAME_BASE)? / PAGE_SIZE).ok()?;
        match self.slots.get(index) {
            Some(Some(_)) => Some(index),
            _ => None,
        }
    }

    fn frame_of(index: usize) -> Frame {
        Frame::containing_address(PhysAddr::new(FRAME_BASE + index as u64 * PAGE_SIZE))
    }
}

/// フレームアリーナ
///
/// プロセス間で共有される唯一の構造体なので、内部は `spin::Mutex` で保護し、
/// API はすべて `&self` を取ります。
pub struct FrameArena {
    inner: Mutex<ArenaInner>,
}

impl FrameArena {
    /// 最大 `limit` フレームのアリーナを作成
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                slots: Vec::new(),
                free_slots: VecDeque::new(),
                references: BTreeMap::new(),
                limit,
            }),
        }
    }

    /// ゼロ埋めされたフレームを割り当てる（参照カウント 1）
    ///
    /// 容量を使い切った場合は `None` を返します。
    pub fn allocate_zeroed(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();

        // まずフリーリストから取得を試みる
        let index = if let Some(index) = inner.free_slots.pop_front() {
            inner.slots[index] = Some(Box::new([0; PAGE_SIZE as usize]));
            index
        } else if inner.slots.len() < inner.limit {
            inner.slots.push(Some(Box::new([0; PAGE_SIZE as usize])));
            inner.slots.len() - 1
        } else {
            log::warn!("[Frame] arena exhausted ({} frames)", inner.limit);
            return None;
        };

        let frame = ArenaInner::frame_of(index);
        inner.references.insert(frame, 1);
        Some(frame)
    }

    /// フレームの参照カウントを増やす
    ///
    /// # Panics
    ///
    /// `frame` が割り当て済みでない場合
    pub fn add_reference(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        match inner.references.get_mut(&frame) {
            Some(count) => *count += 1,
            None => panic!("add_reference on free frame {:#x}", frame.start_address()),
        }
    }

    /// フレームの参照カウントを減らす
    ///
    /// 参照カウントが 0 になった場合はフレームを解放し、`true` を返します。
    /// 管理外のフレームに対しては何もせず `false` を返します。
    pub fn release(&self, frame: Frame) -> bool {
        let mut inner = self.inner.lock();
        let Some(count) = inner.references.get_mut(&frame) else {
            return false;
        };
        *count -= 1;
        if *count > 0 {
            return false;
        }
        inner.references.remove(&frame);
        if let Some(index) = inner.slot_of(frame) {
            inner.slots[index] = None;
            inner.free_slots.push_back(index);
        }
        true
    }

    /// 現在の参照カウント（未割り当てなら 0）
    pub fn ref_count(&self, frame: Frame) -> usize {
        self.inner.lock().references.get(&frame).copied().unwrap_or(0)
    }

    /// `frame` が割り当て済みかどうか
    pub fn is_live(&self, frame: Frame) -> bool {
        self.inner.lock().slot_of(frame).is_some()
    }

    /// 割り当て済みフレーム数
    pub fn allocated(&self) -> usize {
        self.inner.lock().references.len()
    }

    /// フレームの内容を読む
    pub fn with_frame<R>(&self, frame: Frame, f: impl FnOnce(&FrameData) -> R) -> Option<R> {
        let inner = self.inner.lock();
        let index = inner.slot_of(frame)?;
        inner.slots[index].as_deref().map(f)
    }

    /// フレームの内容を書き換える
    pub fn with_frame_mut<R>(
        &self,
        frame: Frame,
        f: impl FnOnce(&mut FrameData) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        let index = inner.slot_of(frame)?;
        inner.slots[index].as_deref_mut().map(f)
    }

    /// `src` の内容を `dst` にバイト単位でコピー
    ///
    /// どちらかが未割り当てなら `false` を返します。
    pub fn copy_frame(&self, src: Frame, dst: Frame) -> bool {
        let mut inner = self.inner.lock();
        let (Some(s), Some(d)) = (inner.slot_of(src), inner.slot_of(dst)) else {
            return false;
        };
        if s == d {
            return true;
        }
        let data: FrameData = match inner.slots[s].as_deref() {
            Some(page) => *page,
            None => return false,
        };
        match inner.slots[d].as_deref_mut() {
            Some(page) => {
                *page = data;
                true
            }
            None => false,
        }
    }
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_LIMIT)
    }
}

impl fmt::Debug for FrameArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FrameArena")
            .field("allocated", &inner.references.len())
            .field("limit", &inner.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_zeroed_and_counted() {
        let arena = FrameArena::new(4);
        let frame = arena.allocate_zeroed().unwrap();
        assert_eq!(frame.start_address().as_u64(), FRAME_BASE);
        assert_eq!(arena.ref_count(frame), 1);
        assert_eq!(arena.with_frame(frame, |d| d.iter().all(|&b| b == 0)), Some(true));
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let arena = FrameArena::new(2);
        assert!(arena.allocate_zeroed().is_some());
        assert!(arena.allocate_zeroed().is_some());
        assert!(arena.allocate_zeroed().is_none());
    }

    #[test]
    fn test_release_frees_at_zero_and_reuses_slot() {
        let arena = FrameArena::new(1);
        let frame = arena.allocate_zeroed().unwrap();
        arena.with_frame_mut(frame, |d| d[0] = 0xAA);
        arena.add_reference(frame);

        assert!(!arena.release(frame));
        assert!(arena.is_live(frame));
        assert!(arena.release(frame));
        assert!(!arena.is_live(frame));
        assert_eq!(arena.allocated(), 0);

        // 再利用されたフレームはゼロ埋めされている
        let again = arena.allocate_zeroed().unwrap();
        assert_eq!(again, frame);
        assert_eq!(arena.with_frame(again, |d| d[0]), Some(0));
    }

    #[test]
    fn test_copy_frame() {
        let arena = FrameArena::new(2);
        let a = arena.allocate_zeroed().unwrap();
        let b = arena.allocate_zeroed().unwrap();
        arena.with_frame_mut(a, |d| d.fill(0x5A));
        assert!(arena.copy_frame(a, b));
        assert_eq!(arena.with_frame(b, |d| d.iter().all(|&x| x == 0x5A)), Some(true));
    }

    #[test]
    #[should_panic(expected = "add_reference on free frame")]
    fn test_add_reference_on_free_frame_panics() {
        let arena = FrameArena::new(1);
        let frame = arena.allocate_zeroed().unwrap();
        arena.release(frame);
        arena.add_reference(frame);
    }
}
