// SPDX-License-Identifier: CEPL-1.0
//! Swapchain, its images and one view per image.
//!
//! Choices are made by [`SwapchainPlan`] from plain surface facts so they
//! can be tested without a device; [`SurfaceResourceSet`] realizes a plan.

use std::sync::Arc;

use ash::vk;

use crate::config::PresentPolicy;
use crate::device::DeviceContext;
use crate::error::InitError;
use crate::probe::{AdapterDescriptor, QueueFamilies};
use crate::surface::{Surface, SurfaceSupport};

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// B8G8R8A8_UNORM + SRGB_NONLINEAR when offered or when the surface has no
/// preference (a single UNDEFINED entry), otherwise the first reported pair.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_FORMAT),
        _ => Some(
            formats
                .iter()
                .copied()
                .find(|f| *f == PREFERRED_FORMAT)
                .unwrap_or(formats[0]),
        ),
    }
}

/// First mode of the policy's preference list that the surface offers,
/// else FIFO.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: PresentPolicy,
) -> vk::PresentModeKHR {
    policy
        .preference()
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        // min wins over max when a driver reports inverted bounds.
        vk::Extent2D {
            width: window
                .width
                .min(caps.max_image_extent.width)
                .max(caps.min_image_extent.width),
            height: window
                .height
                .min(caps.max_image_extent.height)
                .max(caps.min_image_extent.height),
        }
    }
}

/// `max(min_image_count, 1)`, capped by `max_image_count` (0 = unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count.max(1);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

pub fn choose_sharing(queues: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if queues.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![queues.graphics, queues.present],
        )
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|a| caps.supported_composite_alpha.contains(*a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

fn choose_transform(caps: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    }
}

/// Everything decided about a swapchain before creating it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainPlan {
    /// `None` when the surface reports no formats.
    pub fn new(
        support: &SurfaceSupport,
        window: vk::Extent2D,
        policy: PresentPolicy,
    ) -> Option<Self> {
        let caps = &support.capabilities;
        Some(Self {
            format: choose_surface_format(&support.formats)?,
            present_mode: choose_present_mode(&support.present_modes, policy),
            extent: choose_extent(caps, window),
            image_count: choose_image_count(caps),
            pre_transform: choose_transform(caps),
            composite_alpha: choose_composite_alpha(caps),
        })
    }

    /// A zero-area extent cannot back a swapchain; rendering pauses instead.
    pub fn is_presentable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

/// One view per image. Views created before a failure are destroyed.
fn create_views<FCreate, FDestroy>(
    images: &[vk::Image],
    format: vk::Format,
    mut create: FCreate,
    mut destroy: FDestroy,
) -> Result<Vec<vk::ImageView>, vk::Result>
where
    FCreate: FnMut(&vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView, vk::Result>,
    FDestroy: FnMut(vk::ImageView),
{
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        match create(&info) {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views.drain(..) {
                    destroy(view);
                }
                return Err(e);
            }
        }
    }
    Ok(views)
}

/// Swapchain + views. Images are owned by the swapchain itself.
///
/// Must be dropped before its surface and device, which the `Arc` fields
/// guarantee.
pub struct SurfaceResourceSet {
    device: Arc<DeviceContext>,
    _surface: Arc<Surface>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    plan: SwapchainPlan,
}

impl std::fmt::Debug for SurfaceResourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceResourceSet")
            .field("handle", &self.handle)
            .field("images", &self.images.len())
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl SurfaceResourceSet {
    /// Query the surface fresh and decide the swapchain shape.
    pub fn plan_for(
        surface: &Surface,
        adapter: &AdapterDescriptor,
        window_extent: vk::Extent2D,
        policy: PresentPolicy,
    ) -> Result<SwapchainPlan, InitError> {
        let support = surface
            .support(adapter.phys)
            .map_err(InitError::vulkan("query surface support"))?;
        SwapchainPlan::new(&support, window_extent, policy).ok_or(InitError::Vulkan {
            what: "choose surface format",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })
    }

    pub fn build(
        device: &Arc<DeviceContext>,
        surface: &Arc<Surface>,
        adapter: &AdapterDescriptor,
        window_extent: vk::Extent2D,
        policy: PresentPolicy,
        old: Option<&SurfaceResourceSet>,
    ) -> Result<Self, InitError> {
        let plan = Self::plan_for(surface, adapter, window_extent, policy)?;
        Self::realize(device, surface, adapter.queues, plan, old)
    }

    /// Create the swapchain described by `plan`. `old` is passed as the
    /// retirement hint and must be dropped by the caller afterwards.
    pub fn realize(
        device: &Arc<DeviceContext>,
        surface: &Arc<Surface>,
        queues: QueueFamilies,
        plan: SwapchainPlan,
        old: Option<&SurfaceResourceSet>,
    ) -> Result<Self, InitError> {
        if !plan.is_presentable() {
            return Err(InitError::Vulkan {
                what: "vkCreateSwapchainKHR (zero-area extent)",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        }

        let (sharing, families) = choose_sharing(queues);
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.raw(),
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: plan.composite_alpha,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |o| o.handle),
            ..Default::default()
        };

        let loader = device.swapchain_loader();
        // SAFETY: surface and device share an instance; families outlives
        // the call.
        let handle = unsafe { loader.create_swapchain(&info, None) }
            .map_err(InitError::vulkan("vkCreateSwapchainKHR"))?;

        // SAFETY: handle was just created from this loader.
        let images = match unsafe { loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                // SAFETY: nothing references the new swapchain yet.
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(InitError::vulkan("vkGetSwapchainImagesKHR")(e));
            }
        };

        let raw = device.raw();
        let views = create_views(
            &images,
            plan.format.format,
            // SAFETY: images belong to a live swapchain on this device.
            |ci| unsafe { raw.create_image_view(ci, None) },
            // SAFETY: view was created just above and is unused.
            |v| unsafe { raw.destroy_image_view(v, None) },
        );
        let views = match views {
            Ok(views) => views,
            Err(e) => {
                // SAFETY: nothing references the new swapchain yet.
                unsafe { loader.destroy_swapchain(handle, None) };
                return Err(InitError::vulkan("vkCreateImageView")(e));
            }
        };

        tracing::info!(
            "swapchain: {:?}/{:?}, {:?}, {}x{}, {} image(s) (asked {}), {:?} sharing",
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            plan.extent.width,
            plan.extent.height,
            images.len(),
            plan.image_count,
            sharing
        );

        Ok(Self {
            device: Arc::clone(device),
            _surface: Arc::clone(surface),
            handle,
            images,
            views,
            plan,
        })
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn plan(&self) -> &SwapchainPlan {
        &self.plan
    }

    pub fn format(&self) -> vk::Format {
        self.plan.format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.plan.present_mode
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// `Ok((index, suboptimal))`; out-of-date comes back as
    /// `Err(ERROR_OUT_OF_DATE_KHR)`.
    pub fn acquire(&self, timeout_ns: u64, signal: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        // SAFETY: signal is an unsignaled semaphore of this device with no
        // pending signal operation.
        unsafe {
            self.device.swapchain_loader().acquire_next_image(
                self.handle,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )
        }
    }
}

impl Drop for SurfaceResourceSet {
    fn drop(&mut self) {
        tracing::debug!("dropping swapchain {:?}", self.handle);
        let raw = self.device.raw();
        // SAFETY: owners idle the device before dropping a set, so no queued
        // work references the views or images.
        unsafe {
            for view in self.views.drain(..) {
                raw.destroy_image_view(view, None);
            }
            self.device
                .swapchain_loader()
                .destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn free_size_caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(min, min),
            max_image_extent: extent(max, max),
            ..Default::default()
        }
    }

    #[test]
    fn format_prefers_bgra_unorm_srgb() {
        let other = fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let chosen = choose_surface_format(&[other, PREFERRED_FORMAT]).unwrap();
        assert_eq!(chosen, PREFERRED_FORMAT);
    }

    #[test]
    fn format_without_preference_uses_preferred_pair() {
        let undefined = fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(choose_surface_format(&[undefined]), Some(PREFERRED_FORMAT));
    }

    #[test]
    fn format_falls_back_to_first_reported() {
        let a = fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let b = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        assert_eq!(choose_surface_format(&[a, b]), Some(a));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn format_choice_is_idempotent() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let first = choose_surface_format(&formats).unwrap();
        assert_eq!(choose_surface_format(&[first]), Some(first));
        assert_eq!(choose_surface_format(&formats), Some(first));
    }

    #[test]
    fn mailbox_wins_when_offered() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentPolicy::LowLatency),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], PresentPolicy::LowLatency),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn present_mode_stays_in_supported_set() {
        let sets: [&[vk::PresentModeKHR]; 4] = [
            &[vk::PresentModeKHR::FIFO],
            &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
            &[vk::PresentModeKHR::FIFO_RELAXED, vk::PresentModeKHR::FIFO],
            &[
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::FIFO,
            ],
        ];
        for modes in sets {
            for policy in [
                PresentPolicy::LowLatency,
                PresentPolicy::Vsync,
                PresentPolicy::Uncapped,
            ] {
                assert!(modes.contains(&choose_present_mode(modes, policy)));
            }
        }
    }

    #[test]
    fn policies_order_modes_differently() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&all, PresentPolicy::Vsync),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&all, PresentPolicy::Uncapped),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(
                &[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
                PresentPolicy::LowLatency
            ),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn window_size_used_when_current_extent_undefined() {
        let caps = free_size_caps(1, 4096);
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
    }

    #[test]
    fn extent_is_clamped_per_axis() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(640, 480),
            max_image_extent: extent(1920, 1080),
            ..Default::default()
        };
        for (w, h) in [(0, 0), (4000, 200), (800, 600), (u32::MAX - 1, 5000)] {
            let e = choose_extent(&caps, extent(w, h));
            assert!((640..=1920).contains(&e.width));
            assert!((480..=1080).contains(&e.height));
        }
    }

    #[test]
    fn inverted_bounds_prefer_the_minimum() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(800, 600),
            max_image_extent: extent(640, 480),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, extent(1024, 768)), extent(800, 600));
        assert_eq!(choose_extent(&caps, extent(1, 1)), extent(800, 600));
    }

    #[test]
    fn fixed_current_extent_wins() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(1280, 720));
    }

    #[test]
    fn image_count_respects_bounds() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.min_image_count = 0;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 1);
    }

    #[test]
    fn sharing_follows_queue_families() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert_eq!(choose_sharing(shared), (vk::SharingMode::EXCLUSIVE, vec![]));
        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(
            choose_sharing(split),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn plan_is_stable_for_unchanged_capabilities() {
        let support = SurfaceSupport {
            capabilities: free_size_caps(1, 4096),
            formats: vec![
                fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                PREFERRED_FORMAT,
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        let a = SwapchainPlan::new(&support, extent(800, 600), PresentPolicy::LowLatency).unwrap();
        let b = SwapchainPlan::new(&support, extent(800, 600), PresentPolicy::LowLatency).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.image_count, 2);
        assert_eq!(a.format, PREFERRED_FORMAT);
        assert_eq!(a.extent, extent(800, 600));
        assert_eq!(a.present_mode, vk::PresentModeKHR::MAILBOX);
        assert!(a.is_presentable());
    }

    #[test]
    fn zero_area_plan_is_not_presentable() {
        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                current_extent: extent(0, 0),
                ..Default::default()
            },
            formats: vec![PREFERRED_FORMAT],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let plan = SwapchainPlan::new(&support, extent(0, 0), PresentPolicy::Vsync).unwrap();
        assert!(!plan.is_presentable());
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        assert_eq!(choose_composite_alpha(&caps), vk::CompositeAlphaFlagsKHR::OPAQUE);
    }

    #[test]
    fn views_match_images_one_to_one() {
        let images = [vk::Image::from_raw(1), vk::Image::from_raw(2), vk::Image::from_raw(3)];
        let seen = RefCell::new(Vec::new());
        let views = create_views(
            &images,
            vk::Format::B8G8R8A8_UNORM,
            |ci| {
                assert_eq!(ci.view_type, vk::ImageViewType::TYPE_2D);
                assert_eq!(ci.subresource_range.level_count, 1);
                assert_eq!(ci.subresource_range.layer_count, 1);
                seen.borrow_mut().push(ci.image);
                Ok(vk::ImageView::from_raw(ci.image.as_raw() + 100))
            },
            |_| panic!("nothing should be destroyed"),
        )
        .unwrap();
        assert_eq!(views.len(), images.len());
        assert_eq!(seen.borrow().as_slice(), &images);
        assert_eq!(views[2], vk::ImageView::from_raw(103));
    }

    #[test]
    fn partial_view_creation_is_rolled_back() {
        let images = [vk::Image::from_raw(1), vk::Image::from_raw(2), vk::Image::from_raw(3)];
        let calls = RefCell::new(0usize);
        let destroyed = RefCell::new(Vec::new());
        let result = create_views(
            &images,
            vk::Format::B8G8R8A8_UNORM,
            |_| {
                let mut n = calls.borrow_mut();
                *n += 1;
                if *n < 3 {
                    Ok(vk::ImageView::from_raw(*n as u64 * 10))
                } else {
                    Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
                }
            },
            |v| destroyed.borrow_mut().push(v),
        );
        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        assert_eq!(
            destroyed.borrow().as_slice(),
            &[vk::ImageView::from_raw(10), vk::ImageView::from_raw(20)]
        );
    }
}
