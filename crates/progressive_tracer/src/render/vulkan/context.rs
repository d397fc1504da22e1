//! Vulkan context management
//!
//! Instance, physical device selection and the logical device. There is no
//! surface: frames are rendered into offscreen images handed to an external
//! presenter, so the only hard requirements are a graphics queue and timeline
//! semaphore support (core in Vulkan 1.2).

use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use crate::render::backend::GpuError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for GpuError {
    fn from(err: VulkanError) -> Self {
        match err {
            VulkanError::Api(vk::Result::ERROR_DEVICE_LOST) => Self::DeviceLost,
            VulkanError::Api(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            ) => Self::OutOfMemory { requested: 0 },
            VulkanError::Api(result) => Self::Api(format!("{result:?}")),
            VulkanError::InvalidOperation { reason } => Self::InvalidOperation { reason },
            VulkanError::OutOfMemory { requested } => Self::OutOfMemory { requested },
            VulkanError::InitializationFailed(reason) => Self::Api(reason),
            VulkanError::NoSuitableMemoryType => {
                Self::Unsupported("no suitable memory type".to_string())
            }
        }
    }
}

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Whether a reported instance layer is the Khronos validation layer
fn is_validation_layer(layer: &vk::LayerProperties) -> bool {
    let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
    name == VALIDATION_LAYER
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.2 instance, optionally with validation
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| {
                VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}"))
            })?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|_| {
                VulkanError::InitializationFailed("Application name contains NUL".to_string())
            })?;
        let engine_name_cstr = CString::new("progressive_tracer")
            .map_err(|_| {
                VulkanError::InitializationFailed("Engine name contains NUL".to_string())
            })?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let extensions: Vec<*const i8> = if validation {
            vec![DebugUtils::name().as_ptr()]
        } else {
            Vec::new()
        };
        let layers: Vec<*const i8> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe {
            entry.create_instance(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Self { entry, instance, debug })
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| layers.iter().any(is_validation_layer))
            .unwrap_or(false)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let callback_data = *callback_data;
    let message = CStr::from_ptr(callback_data.p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Adapter name
    pub name: String,
}

impl PhysicalDeviceInfo {
    /// Pick the first GPU with a graphics queue and timeline semaphores
    pub fn select_suitable_device(instance: &Instance) -> VulkanResult<Self> {
        let devices = unsafe {
            instance.enumerate_physical_devices()
                .map_err(VulkanError::Api)?
        };

        for device in devices {
            match Self::evaluate_device(instance, device) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name);
                    return Ok(info);
                }
                Err(err) => log::debug!("Skipping GPU: {}", err),
            }
        }

        Err(VulkanError::InitializationFailed("No suitable GPU found".to_string()))
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        if properties.api_version < vk::API_VERSION_1_2 {
            return Err(VulkanError::InitializationFailed(format!("{name} lacks Vulkan 1.2")));
        }

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let graphics_family = queue_families
            .iter()
            .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or_else(|| {
                VulkanError::InitializationFailed(format!("{name} has no graphics queue"))
            })?;

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::builder().push_next(&mut vulkan12);
        unsafe { instance.get_physical_device_features2(device, &mut features) };
        if vulkan12.timeline_semaphore != vk::TRUE {
            return Err(VulkanError::InitializationFailed(format!(
                "{name} does not support timeline semaphores"
            )));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family: graphics_family as u32,
            name,
        })
    }

    /// Find memory type with required properties
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<u32> {
        (0..self.memory_properties.memory_type_count)
            .find(|&i| {
                (type_filter & (1 << i)) != 0
                    && self.memory_properties.memory_types[i as usize]
                        .property_flags
                        .contains(properties)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Index of the graphics queue family
    pub graphics_family: u32,
}

impl LogicalDevice {
    /// Create the device with one graphics queue and timeline semaphores enabled
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(physical_device.graphics_family)
            .queue_priorities(&priorities)
            .build()];

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder().timeline_semaphore(true);
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .push_next(&mut vulkan12);

        let device = unsafe {
            instance.create_device(physical_device.device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };

        Ok(Self {
            device,
            graphics_queue,
            graphics_family: physical_device.graphics_family,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {:?}", err);
            }
            self.device.destroy_device(None);
        }
    }
}

/// Owns the core Vulkan objects; shared by every resource through `Arc`
///
/// Fields drop in declaration order: the logical device before the instance.
pub struct VulkanContext {
    /// Logical device and queue
    pub device: LogicalDevice,
    /// Selected physical device
    pub physical_device: PhysicalDeviceInfo,
    /// Instance and debug messenger
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create an instance, pick a GPU and open a device on it
    pub fn new(app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(app_name, enable_validation)?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self { device, physical_device, instance })
    }

    /// Get the raw device
    pub fn raw_device(&self) -> &Device {
        &self.device.device
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.device.graphics_family
    }
}
