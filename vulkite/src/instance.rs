use std::{
    ffi::{CStr, CString},
    fmt::Debug,
    str::FromStr,
    sync::Arc,
};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use thiserror::Error;

use crate::device::DeviceFinder;
use crate::log::VulkanLogLevel;

#[derive(Debug, Error)]
pub enum CreateInstanceError {
    #[error("Could not load libvulkan: {0}")]
    LibraryLoading(libloading::Error),
    #[error("Could not load vkGetInstanceProcAddr from libvulkan")]
    MissingEntryPoint,
    #[error("Couldn't get display handle from the surface-support source: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Unknown Vulkan error creating instance: {0}")]
    UnknownVulkan(vk::Result),
    #[error("Application name contains an interior NUL byte")]
    InvalidAppName,
}

impl From<vk::Result> for CreateInstanceError {
    fn from(value: vk::Result) -> Self {
        CreateInstanceError::UnknownVulkan(value)
    }
}

#[derive(Debug, Error)]
pub enum CreateRawSurfaceError {
    #[error("Error creating surface: {0}")]
    OnCreate(vk::Result),
    #[error("Unable to get display handle: {0}")]
    DisplayHandle(raw_window_handle::HandleError),
    #[error("Unable to get window handle: {0}")]
    WindowHandle(raw_window_handle::HandleError),
    #[error("Surface extensions were not requested on this instance")]
    ExtensionNotLoaded,
}

#[derive(Debug, Error)]
pub enum DestroyRawSurfaceError {
    #[error("Surface extensions were not requested on this instance")]
    ExtensionNotLoaded,
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Memory exhaustion while fetching physical devices")]
    MemoryExhaustion,
    #[error("Unknown Vulkan error fetching physical devices: {0}")]
    UnknownVulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SurfaceQueryError {
    #[error("Surface extensions were not requested on this instance")]
    ExtensionNotLoaded,
    #[error("Vulkan error querying surface: {0}")]
    Vulkan(vk::Result),
}

/// An owned `VkInstance` plus the loader entry it was created from.
///
/// Every other wrapper in this crate is transitively parented to an
/// `Arc<Instance>`; the instance is destroyed last, after all children.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger: Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    surface_instance: Option<ash::khr::surface::Instance>,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        if let Some((messenger, debug_utils_instance)) = self.debug_messenger.take() {
            //SAFETY: The messenger was created from this instance and this is
            //its last use.
            unsafe { debug_utils_instance.destroy_debug_utils_messenger(messenger, None) };
        }
        //SAFETY: We are in drop, so every object derived from this instance
        //must already be gone.
        unsafe { self.handle.destroy_instance(None) };
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data is valid for the call.
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: "vk-debug-messenger", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "vk-debug-messenger", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vk-debug-messenger", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vk-debug-messenger", "[{}] {}", type_str, message);
        }
        _ => {
            tracing::debug!(target: "vk-debug-messenger", "[{}] {}", type_str, message);
        }
    }

    vk::FALSE
}

/// Fluent configuration for [`Instance`] creation.
///
/// Consuming: each chain step moves the builder, and `build` can only ever
/// run once per builder value.
pub struct InstanceBuilder {
    app_name: String,
    extra_extensions: Vec<&'static CStr>,
    display_handle: Option<Result<RawDisplayHandle, raw_window_handle::HandleError>>,
    max_log_level: Option<VulkanLogLevel>,
}

impl InstanceBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            extra_extensions: Vec::new(),
            display_handle: None,
            max_log_level: None,
        }
    }

    /// Request the surface extensions needed to present to windows created
    /// on the same display as `source`.
    ///
    /// The windowing collaborator is the authority on which extensions a
    /// platform needs; they are resolved at `build` time via `ash-window`.
    pub fn with_surface_support(mut self, source: &impl HasDisplayHandle) -> Self {
        self.display_handle = Some(source.display_handle().map(|h| h.as_raw()));
        self
    }

    /// Request one additional instance extension by name.
    pub fn add_extension(mut self, extension: &'static CStr) -> Self {
        self.extra_extensions.push(extension);
        self
    }

    /// Enable the validation layer and debug messenger, forwarding messages
    /// at or above `level` into `tracing`. Silently skipped when the layer
    /// or `VK_EXT_debug_utils` is unavailable.
    pub fn with_debug(mut self, level: VulkanLogLevel) -> Self {
        self.max_log_level = Some(level);
        self
    }

    /// Load Vulkan and create the instance.
    ///
    /// # Safety
    /// This loads libvulkan via `libloading`, which runs arbitrary library
    /// initialization code. The returned instance must outlive every object
    /// created from it (enforced by the `Arc` parent chain elsewhere in this
    /// crate).
    pub unsafe fn build(self) -> Result<Instance, CreateInstanceError> {
        use CreateInstanceError as Error;

        let app_name_cstring =
            CString::from_str(&self.app_name).map_err(|_| Error::InvalidAppName)?;

        //SAFETY: Caller accepts the burden of loading libvulkan. All other
        //Vulkan objects are dropped before the entry (Instance's Drop).
        let entry = unsafe { ash::Entry::load() }.map_err(|e| match e {
            ash::LoadingError::LibraryLoadFailure(error) => Error::LibraryLoading(error),
            ash::LoadingError::MissingEntryPoint(_) => Error::MissingEntryPoint,
        })?;

        //SAFETY: Always valid to call on a loaded entry.
        let api_version = unsafe { entry.try_enumerate_instance_version() }?
            .unwrap_or(vk::API_VERSION_1_0);

        let mut mandatory_exts: Vec<&CStr> = Vec::new();
        let wants_surface = self.display_handle.is_some();

        if let Some(display_handle) = self.display_handle {
            let display_handle = display_handle.map_err(Error::InvalidDisplayHandle)?;
            let window_exts = ash_window::enumerate_required_extensions(display_handle)?;
            mandatory_exts.extend(
                window_exts
                    .iter()
                    //SAFETY: ash-window documents that these pointers are
                    //null-terminated static strings.
                    .map(|ext_ptr| unsafe { CStr::from_ptr(*ext_ptr) }),
            );
        }
        mandatory_exts.extend(self.extra_extensions.iter().copied());

        //SAFETY: Always valid on a loaded entry.
        let exts_avail = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        //SAFETY: Always valid on a loaded entry.
        let layers_avail = unsafe { entry.enumerate_instance_layer_properties() };

        let missing_exts: Vec<String> = mandatory_exts
            .iter()
            .filter(|wanted| {
                !exts_avail
                    .iter()
                    .any(|avail| avail.extension_name_as_c_str() == Ok(**wanted))
            })
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();
        if !missing_exts.is_empty() {
            return Err(Error::MissingExtensions(missing_exts));
        }

        let debug_utils_ext_name = ash::ext::debug_utils::NAME;
        let validation_layer_name = c"VK_LAYER_KHRONOS_validation";

        let debug_utils_available = exts_avail
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(debug_utils_ext_name));
        let validation_layer_available = layers_avail
            .as_ref()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str() == Ok(validation_layer_name))
            })
            .unwrap_or(false);

        let enable_debug_utils =
            self.max_log_level.is_some() && debug_utils_available && validation_layer_available;

        let mut enabled_exts: Vec<*const std::ffi::c_char> =
            mandatory_exts.iter().map(|ext| ext.as_ptr()).collect();
        let mut enabled_layers: Vec<*const std::ffi::c_char> = Vec::new();

        let mut debug_messenger_create_info = if enable_debug_utils {
            enabled_exts.push(debug_utils_ext_name.as_ptr());
            enabled_layers.push(validation_layer_name.as_ptr());

            let level = self
                .max_log_level
                .expect("enable_debug_utils implies max_log_level is Some");
            let message_severity = match level {
                VulkanLogLevel::Verbose => {
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                }
                VulkanLogLevel::Info => {
                    vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                }
                VulkanLogLevel::Warning => {
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                }
                VulkanLogLevel::Error => vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            };

            Some(
                vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(message_severity)
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback)),
            )
        } else {
            None
        };

        let engine_name = c"vulkite";
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_exts)
            .enabled_layer_names(&enabled_layers);
        if let Some(ref mut debug_info) = debug_messenger_create_info {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: instance_create_info and everything it references is alive
        //for the duration of the call.
        let instance = unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger = match debug_messenger_create_info {
            Some(mut info) => {
                info.p_next = std::ptr::null();
                let debug_utils_instance =
                    ash::ext::debug_utils::Instance::new(&entry, &instance);
                //SAFETY: info is a valid create info for this instance.
                match unsafe { debug_utils_instance.create_debug_utils_messenger(&info, None) } {
                    Ok(messenger) => Some((messenger, debug_utils_instance)),
                    Err(e) => {
                        tracing::error!(
                            "Debug messenger creation failed even though the \
                             extension was reported available; continuing \
                             without one: {e}"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let surface_instance = if wants_surface {
            Some(ash::khr::surface::Instance::new(&entry, &instance))
        } else {
            None
        };

        Ok(Instance {
            entry,
            handle: instance,
            debug_messenger,
            surface_instance,
        })
    }
}

impl Instance {
    /// Start describing the logical device to create from this instance.
    pub fn find_gpu(self: &Arc<Self>) -> DeviceFinder<'static> {
        DeviceFinder::new(Arc::clone(self))
    }

    /// Create a raw `VkSurfaceKHR` bound to `source`'s window.
    ///
    /// # Safety
    /// The returned surface must be destroyed before this instance is
    /// dropped, and before `source`'s window goes away. The `Surface`
    /// wrapper upholds both.
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateRawSurfaceError> {
        use CreateRawSurfaceError as Error;
        if self.surface_instance.is_none() {
            return Err(Error::ExtensionNotLoaded);
        }
        //SAFETY: Caller guarantees the surface is destroyed before the
        //instance and the window source.
        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.handle,
                source.display_handle().map_err(Error::DisplayHandle)?.as_raw(),
                source.window_handle().map_err(Error::WindowHandle)?.as_raw(),
                None,
            )
        }
        .map_err(Error::OnCreate)
    }

    /// # Safety
    /// `surface` must have been created from this instance and every object
    /// derived from it must already be destroyed.
    pub unsafe fn destroy_raw_surface(
        &self,
        surface: vk::SurfaceKHR,
    ) -> Result<(), DestroyRawSurfaceError> {
        match self.surface_instance {
            Some(ref surface_instance) => {
                //SAFETY: Caller guarantees provenance and drop ordering.
                unsafe { surface_instance.destroy_surface(surface, None) };
                Ok(())
            }
            None => Err(DestroyRawSurfaceError::ExtensionNotLoaded),
        }
    }

    /// Handles to the available physical devices. Only valid in the context
    /// of this instance.
    pub fn fetch_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        //SAFETY: Always valid on a live instance.
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(devices) => Ok(devices),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                Err(FetchPhysicalDeviceError::MemoryExhaustion)
            }
            Err(e) => Err(FetchPhysicalDeviceError::UnknownVulkan(e)),
        }
    }

    /// # Safety
    /// `physical_device` must have been fetched from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: Caller guarantees provenance.
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// # Safety
    /// `physical_device` must have been fetched from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        //SAFETY: Caller guarantees provenance.
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` and `surface` must both derive from this instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        //SAFETY: Caller guarantees provenance of both handles.
        unsafe {
            surface_instance.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both derive from this instance.
    pub unsafe fn get_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        //SAFETY: Caller guarantees provenance of both handles.
        unsafe {
            surface_instance.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both derive from this instance.
    pub unsafe fn get_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        //SAFETY: Caller guarantees provenance of both handles.
        unsafe { surface_instance.get_physical_device_surface_formats(physical_device, surface) }
            .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both derive from this instance.
    pub unsafe fn get_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        let surface_instance = self
            .surface_instance
            .as_ref()
            .ok_or(SurfaceQueryError::ExtensionNotLoaded)?;
        //SAFETY: Caller guarantees provenance of both handles.
        unsafe {
            surface_instance.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` must have been fetched from this instance and
    /// `create_info` must be valid for the duration of the call.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: Caller guarantees provenance and create_info validity.
        unsafe { self.handle.create_device(physical_device, create_info, None) }
    }

    pub(crate) fn create_swapchain_loader(
        &self,
        device: &ash::Device,
    ) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }

    pub(crate) fn create_debug_utils_device_loader(
        &self,
        device: &ash::Device,
    ) -> Option<ash::ext::debug_utils::Device> {
        self.debug_messenger
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&self.handle, device))
    }

    pub fn has_surface_support(&self) -> bool {
        self.surface_instance.is_some()
    }

    pub fn raw_handle(&self) -> vk::Instance {
        self.handle.handle()
    }
}
