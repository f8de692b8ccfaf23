// SPDX-License-Identifier: CEPL-1.0
//! Capability prober: picks the adapter and queue families the rest of the
//! engine is built on.

use std::ffi::{CStr, CString};
use std::fmt;

use ash::vk;

use crate::error::InitError;
use crate::instance::InstanceContext;
use crate::surface::{Surface, SurfaceSupport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Families that need a queue, graphics first, without duplicates.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyFacts {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub can_present: bool,
}

/// Raw facts gathered about one adapter before judging it.
#[derive(Clone, Debug, Default)]
pub struct AdapterFacts {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyFacts>,
    pub extensions: Vec<CString>,
    pub support: SurfaceSupport,
}

/// The chosen adapter and everything derived from it.
#[derive(Clone, Debug)]
pub struct AdapterDescriptor {
    pub phys: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queues: QueueFamilies,
    pub support: SurfaceSupport,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    NoGraphicsQueue,
    NoPresentQueue,
    MissingExtensions(Vec<String>),
    NoSurfaceFormats,
    NoPresentModes,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoGraphicsQueue => f.write_str("no graphics queue family"),
            Rejection::NoPresentQueue => f.write_str("no queue family can present to the surface"),
            Rejection::MissingExtensions(names) => write!(f, "missing extensions {names:?}"),
            Rejection::NoSurfaceFormats => f.write_str("surface reports no formats"),
            Rejection::NoPresentModes => f.write_str("surface reports no present modes"),
        }
    }
}

/// Names in `required` that are absent from `available`, in `required` order.
pub fn missing_names(available: &[&CStr], required: &[CString]) -> Vec<String> {
    required
        .iter()
        .filter(|r| !available.contains(&r.as_c_str()))
        .map(|r| r.to_string_lossy().into_owned())
        .collect()
}

/// First graphics-capable family and, independently, the first family that
/// can present. They may be the same index.
pub fn find_queue_families(families: &[QueueFamilyFacts]) -> Option<QueueFamilies> {
    let usable = |f: &&QueueFamilyFacts| f.queue_count > 0;
    let graphics = families
        .iter()
        .enumerate()
        .filter(|(_, f)| usable(f))
        .find(|(_, f)| f.flags.contains(vk::QueueFlags::GRAPHICS))?
        .0;
    let present = families
        .iter()
        .enumerate()
        .filter(|(_, f)| usable(f))
        .find(|(_, f)| f.can_present)?
        .0;
    Some(QueueFamilies {
        graphics: graphics as u32,
        present: present as u32,
    })
}

pub fn evaluate(
    phys: vk::PhysicalDevice,
    facts: AdapterFacts,
    required_extensions: &[CString],
) -> Result<AdapterDescriptor, Rejection> {
    let has_graphics = facts
        .queue_families
        .iter()
        .any(|f| f.queue_count > 0 && f.flags.contains(vk::QueueFlags::GRAPHICS));
    if !has_graphics {
        return Err(Rejection::NoGraphicsQueue);
    }
    let queues = find_queue_families(&facts.queue_families).ok_or(Rejection::NoPresentQueue)?;

    let available: Vec<&CStr> = facts.extensions.iter().map(CString::as_c_str).collect();
    let missing = missing_names(&available, required_extensions);
    if !missing.is_empty() {
        return Err(Rejection::MissingExtensions(missing));
    }

    if facts.support.formats.is_empty() {
        return Err(Rejection::NoSurfaceFormats);
    }
    if facts.support.present_modes.is_empty() {
        return Err(Rejection::NoPresentModes);
    }

    Ok(AdapterDescriptor {
        phys,
        name: facts.name,
        device_type: facts.device_type,
        queues,
        support: facts.support,
    })
}

/// Return the first adapter, in enumeration order, that meets every
/// requirement. `query` gathers the facts for one adapter.
pub fn select_adapter<Q>(
    adapters: &[vk::PhysicalDevice],
    required_extensions: &[CString],
    mut query: Q,
) -> Result<AdapterDescriptor, InitError>
where
    Q: FnMut(vk::PhysicalDevice) -> Result<AdapterFacts, InitError>,
{
    if adapters.is_empty() {
        return Err(InitError::NoSuitableAdapter {
            rejections: vec!["no Vulkan adapters enumerated".into()],
        });
    }

    let mut rejections = Vec::with_capacity(adapters.len());
    let mut missing_ext: Vec<String> = Vec::new();
    let mut only_extensions_missing = true;

    for &phys in adapters {
        let facts = match query(phys) {
            Ok(facts) => facts,
            Err(e) => {
                tracing::debug!("adapter {phys:?} could not be queried: {e}");
                only_extensions_missing = false;
                rejections.push(format!("{phys:?}: {e}"));
                continue;
            }
        };
        let name = facts.name.clone();
        match evaluate(phys, facts, required_extensions) {
            Ok(found) => {
                tracing::info!(
                    "adapter: {} ({:?}), graphics family {}, present family {}",
                    found.name,
                    found.device_type,
                    found.queues.graphics,
                    found.queues.present
                );
                return Ok(found);
            }
            Err(reason) => {
                tracing::debug!("adapter {name} rejected: {reason}");
                match &reason {
                    Rejection::MissingExtensions(names) => {
                        for n in names {
                            if !missing_ext.contains(n) {
                                missing_ext.push(n.clone());
                            }
                        }
                    }
                    _ => only_extensions_missing = false,
                }
                rejections.push(format!("{name}: {reason}"));
            }
        }
    }

    if only_extensions_missing {
        return Err(InitError::ExtensionMissing(missing_ext));
    }
    Err(InitError::NoSuitableAdapter { rejections })
}

/// Gather adapter facts through the live instance and surface.
pub fn query_facts(
    instance: &InstanceContext,
    surface: &Surface,
    phys: vk::PhysicalDevice,
) -> Result<AdapterFacts, InitError> {
    let raw = instance.raw();
    // SAFETY: phys was enumerated from this instance.
    let (props, qprops, ext_props) = unsafe {
        (
            raw.get_physical_device_properties(phys),
            raw.get_physical_device_queue_family_properties(phys),
            raw.enumerate_device_extension_properties(phys)
                .map_err(InitError::vulkan("vkEnumerateDeviceExtensionProperties"))?,
        )
    };

    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| format!("adapter {:?}", phys));

    let mut queue_families = Vec::with_capacity(qprops.len());
    for (i, q) in qprops.iter().enumerate() {
        let can_present = surface
            .supports_present(phys, i as u32)
            .map_err(InitError::vulkan("vkGetPhysicalDeviceSurfaceSupportKHR"))?;
        queue_families.push(QueueFamilyFacts {
            flags: q.queue_flags,
            queue_count: q.queue_count,
            can_present,
        });
    }

    let extensions = ext_props
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    let support = surface
        .support(phys)
        .map_err(InitError::vulkan("query surface support"))?;

    Ok(AdapterFacts {
        name,
        device_type: props.device_type,
        queue_families,
        extensions,
        support,
    })
}
