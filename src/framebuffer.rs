//! Framebuffers.
use crate::{
    debug_marker::{DebugMarker, DeviceChild},
    device::{create_child, DeviceObject, DeviceWeak},
    handle::{CreationError, DeviceObjectHandle},
    refcount::{EmbeddedResource, Ref},
    LifetimeSmallVec,
};
use ash::vk::{self, Handle};
use std::fmt;

/// Parameters of a framebuffer.
#[derive(Debug, Clone, Default)]
pub struct FramebufferCreateInfo {
    /// Creation flags.
    pub flags: vk::FramebufferCreateFlags,
    /// Render pass the framebuffer is compatible with. Must not be null.
    pub render_pass: vk::RenderPass,
    /// Attachments, in render pass order.
    pub attachments: LifetimeSmallVec<vk::ImageView>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of layers.
    pub layers: u32,
}

impl FramebufferCreateInfo {
    /// A single layer framebuffer of the given size.
    pub fn new(render_pass: vk::RenderPass, width: u32, height: u32) -> FramebufferCreateInfo {
        FramebufferCreateInfo {
            render_pass,
            width,
            height,
            layers: 1,
            ..Default::default()
        }
    }

    /// Append an attachment.
    pub fn attachment(mut self, view: vk::ImageView) -> FramebufferCreateInfo {
        self.attachments.push(view);
        self
    }

    /// The extent of the framebuffer.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

/// A framebuffer.
pub struct FramebufferObject {
    handle: DeviceObjectHandle<vk::Framebuffer>,
    marker: DebugMarker,
    create_info: FramebufferCreateInfo,
}

/// Shared handle to a [`FramebufferObject`].
pub type Framebuffer = Ref<FramebufferObject>;

impl FramebufferObject {
    /// Create a framebuffer on `device`.
    pub fn create(
        device: &DeviceWeak,
        create_info: &FramebufferCreateInfo,
    ) -> Result<Framebuffer, CreationError> {
        create_child(
            device,
            "Framebuffer",
            |device| {
                let has_render_pass = create_info.render_pass.as_raw() != 0;
                crate::assertion!(has_render_pass, "Framebuffer: render pass must not be null");
                if !has_render_pass {
                    return Err(CreationError::Validation(
                        "framebuffer render pass must not be null".into(),
                    ));
                }

                if create_info.width == 0 || create_info.height == 0 || create_info.layers == 0 {
                    return Err(CreationError::Validation(format!(
                        "framebuffer dimensions must be non-zero, got {}x{}x{}",
                        create_info.width, create_info.height, create_info.layers
                    )));
                }

                let framebuffer_info = vk::FramebufferCreateInfo::builder()
                    .flags(create_info.flags)
                    .render_pass(create_info.render_pass)
                    .attachments(&create_info.attachments)
                    .width(create_info.width)
                    .height(create_info.height)
                    .layers(create_info.layers);
                Ok(unsafe {
                    device
                        .dispatch()
                        .create_framebuffer(device.handle(), &framebuffer_info)
                }?)
            },
            |handle, _| FramebufferObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::FRAMEBUFFER, "Framebuffer"),
                create_info: create_info.clone(),
            },
        )
    }

    /// The render pass the framebuffer was created for.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.create_info.render_pass
    }

    /// The attachments.
    #[inline]
    pub fn attachments(&self) -> &[vk::ImageView] {
        &self.create_info.attachments
    }

    /// Width and height in pixels.
    #[inline]
    pub fn dimensions(&self) -> vk::Extent2D {
        self.create_info.extent()
    }

    /// Number of layers.
    #[inline]
    pub fn layers(&self) -> u32 {
        self.create_info.layers
    }

    /// The parameters the framebuffer was created with.
    #[inline]
    pub fn create_info(&self) -> &FramebufferCreateInfo {
        &self.create_info
    }
}

impl DeviceChild for FramebufferObject {
    type Handle = vk::Framebuffer;

    #[inline]
    fn object_handle(&self) -> &DeviceObjectHandle<vk::Framebuffer> {
        &self.handle
    }

    #[inline]
    fn debug_marker(&self) -> &DebugMarker {
        &self.marker
    }
}

impl EmbeddedResource for FramebufferObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, framebuffer| unsafe {
                device
                    .dispatch()
                    .destroy_framebuffer(device.handle(), framebuffer)
            });
    }
}

impl fmt::Debug for FramebufferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("handle", &self.handle)
            .field("create_info", &self.create_info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::Fixture;

    fn render_pass() -> vk::RenderPass {
        vk::RenderPass::from_raw(0x77)
    }

    #[test]
    fn create_and_destroy() {
        let fixture = Fixture::new();
        let framebuffer = fixture
            .device
            .create_framebuffer(
                &FramebufferCreateInfo::new(render_pass(), 1920, 1080)
                    .attachment(vk::ImageView::from_raw(1))
                    .attachment(vk::ImageView::from_raw(2)),
            )
            .unwrap();

        assert_eq!(framebuffer.render_pass(), render_pass());
        assert_eq!(framebuffer.attachments().len(), 2);
        assert_eq!(framebuffer.dimensions().height, 1080);
        assert_eq!(framebuffer.layers(), 1);
        assert!(framebuffer.device().is_valid());

        drop(framebuffer);
        assert_eq!(fixture.state.count("vkCreateFramebuffer"), 1);
        assert_eq!(fixture.state.count("vkDestroyFramebuffer"), 1);
    }

    #[test]
    fn zero_sized_framebuffer_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .device
            .create_framebuffer(&FramebufferCreateInfo::new(render_pass(), 0, 1080))
            .unwrap_err();

        assert!(matches!(err, CreationError::Validation(_)));
        assert_eq!(fixture.state.count("vkCreateFramebuffer"), 0);
    }

    #[test]
    fn driver_failure_is_propagated() {
        let fixture = Fixture::new();
        *fixture.state.fail_next_create.lock().unwrap() = Some(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let err = fixture
            .device
            .create_framebuffer(&FramebufferCreateInfo::new(render_pass(), 64, 64))
            .unwrap_err();

        assert_eq!(err, CreationError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(fixture.state.count("vkDestroyFramebuffer"), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "render pass must not be null")]
    fn null_render_pass_asserts() {
        let fixture = Fixture::new();
        let _ = fixture
            .device
            .create_framebuffer(&FramebufferCreateInfo::new(vk::RenderPass::null(), 64, 64));
    }

    #[test]
    fn null_render_pass_never_reaches_the_driver() {
        let fixture = Fixture::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            fixture
                .device
                .create_framebuffer(&FramebufferCreateInfo::new(vk::RenderPass::null(), 64, 64))
        }));

        match result {
            // Debug builds stop at the assertion.
            Err(_) => assert!(cfg!(debug_assertions)),
            Ok(created) => assert!(matches!(created, Err(CreationError::Validation(_)))),
        }
        assert_eq!(fixture.state.count("vkCreateFramebuffer"), 0);
    }
}
