use std::rc::Rc;

use ash::vk;
use astra_rhi::core::command_buffer::RhiCommandBuffer;
use astra_rhi::core::command_pool::RhiCommandPool;
use astra_rhi::core::command_queue::{RhiQueue, RhiSubmitInfo};
use astra_rhi::core::synchronize::{RhiFence, RhiSemaphore};
use astra_rhi::rhi::Rhi;
use itertools::Itertools;

/// CPU 和 GPU 之间最多重叠的帧数
pub const FRAMES_IN_FLIGHT: usize = 2;

/// fence 的等待时限，超时视为 device hang
pub const FRAME_FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// frame index 到 frame slot 的映射
#[inline]
pub fn slot_index(frame_index: usize) -> usize {
    frame_index % FRAMES_IN_FLIGHT
}

/// 单个可复用的帧执行上下文
///
/// fence 表示「GPU 完成了这个 slot 的上一次使用」；
/// 在观察到 fence signaled 之前，不能复用 command buffer，也不能释放其引用的资源
pub struct FrameSlot {
    command_pool: Rc<RhiCommandPool>,
    command_buffer: RhiCommandBuffer,

    fence: RhiFence,
    image_acquired: RhiSemaphore,
    render_finished: RhiSemaphore,
}

impl FrameSlot {
    fn new(rhi: &Rhi, index: usize) -> Self {
        let command_pool = Rc::new(RhiCommandPool::new(
            rhi.device.clone(),
            rhi.graphics_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("frame-command-pool-{index}"),
        ));
        let command_buffer =
            RhiCommandBuffer::new(rhi.device.clone(), command_pool.clone(), &format!("frame-command-buffer-{index}"));

        Self {
            command_pool,
            command_buffer,
            // 初始即为 signaled，第一次使用无需等待
            fence: RhiFence::new(rhi.device.clone(), true, &format!("frame-fence-{index}")),
            image_acquired: RhiSemaphore::new(rhi.device.clone(), &format!("image-acquired-semaphore-{index}")),
            render_finished: RhiSemaphore::new(rhi.device.clone(), &format!("render-finished-semaphore-{index}")),
        }
    }

    #[inline]
    pub fn command_buffer(&self) -> &RhiCommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_acquired_semaphore(&self) -> &RhiSemaphore {
        &self.image_acquired
    }

    #[inline]
    pub fn render_finished_semaphore(&self) -> &RhiSemaphore {
        &self.render_finished
    }
}

/// N=2 的 frame ring，slot 由 `frame_index % 2` 选出
pub struct FrameContext {
    slots: Vec<FrameSlot>,

    /// 一直累加的帧序号，resize 跳过的帧不会推进
    frame_index: usize,
}

impl FrameContext {
    pub fn new(rhi: &Rhi) -> Self {
        let slots = (0..FRAMES_IN_FLIGHT).map(|index| FrameSlot::new(rhi, index)).collect_vec();
        Self {
            slots,
            frame_index: 0,
        }
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// 将帧计数清零，重新开始累积
    #[inline]
    pub fn reset_frame_index(&mut self) {
        self.frame_index = 0;
    }

    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[slot_index(self.frame_index)]
    }

    /// 等待当前 slot 的 fence
    ///
    /// 此处不 reset fence：acquire 失败的帧会以同一 frame index 重试，
    /// slot 必须保持「上一次使用已完成」的状态
    pub fn wait_current_fence(&self) {
        self.current_slot().fence.wait(FRAME_FENCE_TIMEOUT_NS);
    }

    /// reset fence 和 command pool，开始录制当前 slot 的 command buffer
    ///
    /// 前置条件：fence 已经被观察到 signaled
    pub fn begin_record(&self) -> &RhiCommandBuffer {
        let slot = self.current_slot();

        slot.fence.reset();
        slot.command_pool.reset_all_buffers();
        slot.command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        &slot.command_buffer
    }

    /// 结束录制并提交：
    /// - 在 COLOR_ATTACHMENT_OUTPUT 阶段等待 image_acquired
    /// - signal render_finished 和 slot 的 fence
    pub fn end_and_submit(&self, queue: &RhiQueue) {
        let slot = self.current_slot();
        slot.command_buffer.end();

        let submit_info = RhiSubmitInfo::new(std::slice::from_ref(&slot.command_buffer))
            .wait_infos(&[(slot.image_acquired.clone(), vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)])
            .signal_infos(&[(slot.render_finished.clone(), vk::PipelineStageFlags2::ALL_COMMANDS)]);

        queue.submit(vec![submit_info], Some(&slot.fence));
    }

    /// 只有实际渲染过的帧才会推进计数
    #[inline]
    pub fn advance_frame(&mut self) {
        self.frame_index += 1;
    }

    /// 需要手动调用该函数释放资源，前置条件：device idle
    pub fn destroy(self) {
        for slot in self.slots.into_iter() {
            slot.fence.destroy();
            slot.image_acquired.destroy();
            slot.render_finished.destroy();
            slot.command_buffer.free();
            drop(slot.command_pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_selection_cycles_with_period_two() {
        for frame_index in 0..16 {
            assert_eq!(slot_index(frame_index), frame_index % 2);
            assert_eq!(slot_index(frame_index), slot_index(frame_index + FRAMES_IN_FLIGHT));
        }
    }

    #[test]
    fn test_adjacent_frames_use_different_slots() {
        for frame_index in 0..16 {
            assert_ne!(slot_index(frame_index), slot_index(frame_index + 1));
        }
    }
}
