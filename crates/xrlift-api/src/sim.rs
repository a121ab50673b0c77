//! A simulated XR runtime backed by a headless `wgpu` device.
//!
//! `SimRuntime` plays the role of the "next" implementation in layer tests:
//! it mints handles, owns real `wgpu::Texture` rings for its swapchains, and
//! records enough of what it was asked to do that tests can assert on the
//! exact descriptors that reached it. Failures can be injected per call to
//! exercise the downstream-failure propagation paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::chain::CallId;
use crate::types::{
    Extent2d, FrameEndInfo, SessionCreateInfo, SessionHandle, SwapchainCreateInfo,
    SwapchainHandle, SwapchainImage, SwapchainUsage, SystemId, ViewConfigurationType,
    ViewConfigurationView,
};
use crate::{ErrorCode, XrResult, XrRuntime};

/// Number of images in each simulated swapchain ring.
pub const SIM_IMAGE_COUNT: u32 = 3;

pub fn texture_usages_for(usage: SwapchainUsage, format: wgpu::TextureFormat) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::TEXTURE_BINDING;
    if usage.contains(SwapchainUsage::COLOR_ATTACHMENT)
        || usage.contains(SwapchainUsage::DEPTH_STENCIL_ATTACHMENT)
    {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(SwapchainUsage::UNORDERED_ACCESS) && !format.is_srgb() {
        out |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(SwapchainUsage::TRANSFER_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(SwapchainUsage::TRANSFER_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    EnumerateViewConfigurationViews,
    EnumerateSwapchainFormats,
    CreateSession,
    DestroySession(SessionHandle),
    CreateSwapchain(SwapchainCreateInfo),
    DestroySwapchain(SwapchainHandle),
    EnumerateSwapchainImages(SwapchainHandle),
    AcquireSwapchainImage(SwapchainHandle),
    EndFrame,
}

struct SimSwapchain {
    session: SessionHandle,
    info: SwapchainCreateInfo,
    images: Vec<Arc<wgpu::Texture>>,
    next_acquire: u32,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    sessions: HashMap<SessionHandle, ()>,
    swapchains: HashMap<SwapchainHandle, SimSwapchain>,
    calls: Vec<SimCall>,
    fail_next: Option<(CallId, ErrorCode)>,
    last_end_frame: Option<FrameEndInfo>,
}

pub struct SimRuntime {
    device: Arc<wgpu::Device>,
    display: Extent2d,
    view_count: u32,
    formats: Vec<wgpu::TextureFormat>,
    format_enumeration: bool,
    state: Mutex<SimState>,
}

impl SimRuntime {
    pub fn new(device: Arc<wgpu::Device>, display: Extent2d) -> Self {
        Self {
            device,
            display,
            view_count: 2,
            formats: vec![
                wgpu::TextureFormat::Rgba8UnormSrgb,
                wgpu::TextureFormat::Rgba8Unorm,
                wgpu::TextureFormat::Bgra8UnormSrgb,
                wgpu::TextureFormat::Depth24PlusStencil8,
            ],
            format_enumeration: true,
            state: Mutex::new(SimState {
                next_handle: 1,
                ..SimState::default()
            }),
        }
    }

    /// Replace the advertised swapchain format list.
    pub fn with_formats(mut self, formats: Vec<wgpu::TextureFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Simulate an older runtime revision without format enumeration.
    pub fn without_format_enumeration(mut self) -> Self {
        self.format_enumeration = false;
        self
    }

    /// Make the next invocation of `call` fail with `code`.
    pub fn inject_failure(&self, call: CallId, code: ErrorCode) {
        self.state.lock().unwrap().fail_next = Some((call, code));
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// The create-info the runtime last saw for `swapchain`, if it is alive.
    pub fn swapchain_info(&self, swapchain: SwapchainHandle) -> Option<SwapchainCreateInfo> {
        self.state
            .lock()
            .unwrap()
            .swapchains
            .get(&swapchain)
            .map(|sc| sc.info.clone())
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state.lock().unwrap().swapchains.len()
    }

    /// The frame-end payload that reached the runtime on the last submission.
    pub fn last_end_frame(&self) -> Option<FrameEndInfo> {
        self.state.lock().unwrap().last_end_frame.clone()
    }

    fn check_injected(&self, state: &mut SimState, call: CallId) -> XrResult<()> {
        if let Some((injected, code)) = state.fail_next {
            if injected == call {
                state.fail_next = None;
                return Err(code);
            }
        }
        Ok(())
    }

    fn mint<H>(state: &mut SimState, wrap: impl FnOnce(u64) -> H) -> H {
        let raw = state.next_handle;
        state.next_handle += 1;
        wrap(raw)
    }

    fn make_images(&self, info: &SwapchainCreateInfo) -> Vec<Arc<wgpu::Texture>> {
        (0..SIM_IMAGE_COUNT)
            .map(|i| {
                Arc::new(self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&format!("sim swapchain image {i}")),
                    size: wgpu::Extent3d {
                        width: info.width,
                        height: info.height,
                        depth_or_array_layers: info.array_size,
                    },
                    mip_level_count: info.mip_count,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: info.format,
                    usage: texture_usages_for(info.usage, info.format),
                    view_formats: &[],
                }))
            })
            .collect()
    }
}

impl XrRuntime for SimRuntime {
    fn enumerate_view_configuration_views(
        &self,
        _system: SystemId,
        config: ViewConfigurationType,
    ) -> XrResult<Vec<ViewConfigurationView>> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::EnumerateViewConfigurationViews)?;
        state.calls.push(SimCall::EnumerateViewConfigurationViews);

        let count = match config {
            ViewConfigurationType::PrimaryMono => 1,
            ViewConfigurationType::PrimaryStereo => self.view_count,
        };
        Ok((0..count)
            .map(|_| ViewConfigurationView {
                recommended_image_rect_width: self.display.width,
                recommended_image_rect_height: self.display.height,
                max_image_rect_width: self.display.width * 2,
                max_image_rect_height: self.display.height * 2,
                recommended_swapchain_sample_count: 1,
            })
            .collect())
    }

    fn supports_swapchain_format_enumeration(&self) -> bool {
        self.format_enumeration
    }

    fn enumerate_swapchain_formats(
        &self,
        _session: SessionHandle,
    ) -> XrResult<Vec<wgpu::TextureFormat>> {
        if !self.format_enumeration {
            return Err(ErrorCode::FunctionUnsupported);
        }
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::EnumerateSwapchainFormats)?;
        state.calls.push(SimCall::EnumerateSwapchainFormats);
        Ok(self.formats.clone())
    }

    fn create_session(&self, create_info: &SessionCreateInfo) -> XrResult<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::CreateSession)?;
        state.calls.push(SimCall::CreateSession);

        if create_info.bindings.is_empty() {
            return Err(ErrorCode::GraphicsDeviceInvalid);
        }
        let session = Self::mint(&mut state, SessionHandle);
        state.sessions.insert(session, ());
        Ok(session)
    }

    fn destroy_session(&self, session: SessionHandle) -> XrResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::DestroySession)?;
        state.calls.push(SimCall::DestroySession(session));

        if state.sessions.remove(&session).is_none() {
            return Err(ErrorCode::HandleInvalid);
        }
        state.swapchains.retain(|_, sc| sc.session != session);
        Ok(())
    }

    fn create_swapchain(
        &self,
        session: SessionHandle,
        create_info: &SwapchainCreateInfo,
    ) -> XrResult<SwapchainHandle> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::CreateSwapchain)?;
        state.calls.push(SimCall::CreateSwapchain(create_info.clone()));

        if !state.sessions.contains_key(&session) {
            return Err(ErrorCode::HandleInvalid);
        }
        if !self.formats.contains(&create_info.format) {
            return Err(ErrorCode::SwapchainFormatUnsupported);
        }
        let images = self.make_images(create_info);
        let swapchain = Self::mint(&mut state, SwapchainHandle);
        state.swapchains.insert(
            swapchain,
            SimSwapchain {
                session,
                info: create_info.clone(),
                images,
                next_acquire: 0,
            },
        );
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) -> XrResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::DestroySwapchain)?;
        state.calls.push(SimCall::DestroySwapchain(swapchain));

        if state.swapchains.remove(&swapchain).is_none() {
            return Err(ErrorCode::HandleInvalid);
        }
        Ok(())
    }

    fn enumerate_swapchain_images(
        &self,
        swapchain: SwapchainHandle,
    ) -> XrResult<Vec<SwapchainImage>> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::EnumerateSwapchainImages)?;
        state.calls.push(SimCall::EnumerateSwapchainImages(swapchain));

        let sc = state
            .swapchains
            .get(&swapchain)
            .ok_or(ErrorCode::HandleInvalid)?;
        Ok(sc
            .images
            .iter()
            .map(|texture| SwapchainImage {
                texture: Arc::clone(texture),
            })
            .collect())
    }

    fn acquire_swapchain_image(&self, swapchain: SwapchainHandle) -> XrResult<u32> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::AcquireSwapchainImage)?;
        state.calls.push(SimCall::AcquireSwapchainImage(swapchain));

        let sc = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or(ErrorCode::HandleInvalid)?;
        let index = sc.next_acquire;
        sc.next_acquire = (sc.next_acquire + 1) % sc.images.len() as u32;
        Ok(index)
    }

    fn end_frame(&self, session: SessionHandle, frame: &FrameEndInfo) -> XrResult<()> {
        let mut state = self.state.lock().unwrap();
        self.check_injected(&mut state, CallId::EndFrame)?;
        state.calls.push(SimCall::EndFrame);

        if !state.sessions.contains_key(&session) {
            return Err(ErrorCode::HandleInvalid);
        }
        state.last_end_frame = Some(frame.clone());
        Ok(())
    }
}

