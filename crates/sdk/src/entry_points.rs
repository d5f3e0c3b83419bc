//! Exported entry points of the loader module
//!
//! Every entry point listed here must resolve before any of them is
//! intercepted.

/// Graphics backend an entry point belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    D3D11,
    D3D12,
    Vulkan,
}

/// What an entry point does, as far as the interception layer cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Initialization keyed by a numeric application id
    InitAppId,
    /// Initialization keyed by a project id string
    InitProjectId,
    /// Returns a populated parameter object
    AcquireParameters,
}

macro_rules! entry_points {
    ($($variant:ident => ($export:literal, $backend:ident, $kind:ident)),* $(,)?) => {
        /// Loader-module export intercepted by the layer
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EntryPoint {
            $($variant),*
        }

        impl EntryPoint {
            /// Every entry point, in resolution order
            pub const ALL: &'static [EntryPoint] = &[$(EntryPoint::$variant),*];

            /// Exported symbol name
            pub const fn export_name(self) -> &'static str {
                match self {
                    $(EntryPoint::$variant => $export),*
                }
            }

            pub const fn backend(self) -> Backend {
                match self {
                    $(EntryPoint::$variant => Backend::$backend),*
                }
            }

            pub const fn kind(self) -> EntryKind {
                match self {
                    $(EntryPoint::$variant => EntryKind::$kind),*
                }
            }
        }
    };
}

entry_points! {
    D3D11Init => ("NVSDK_NGX_D3D11_Init", D3D11, InitAppId),
    D3D11InitExt => ("NVSDK_NGX_D3D11_Init_Ext", D3D11, InitAppId),
    D3D11InitProjectId => ("NVSDK_NGX_D3D11_Init_ProjectID", D3D11, InitProjectId),
    D3D11AllocateParameters => ("NVSDK_NGX_D3D11_AllocateParameters", D3D11, AcquireParameters),
    D3D11GetCapabilityParameters => ("NVSDK_NGX_D3D11_GetCapabilityParameters", D3D11, AcquireParameters),
    D3D11GetParameters => ("NVSDK_NGX_D3D11_GetParameters", D3D11, AcquireParameters),

    D3D12Init => ("NVSDK_NGX_D3D12_Init", D3D12, InitAppId),
    D3D12InitExt => ("NVSDK_NGX_D3D12_Init_Ext", D3D12, InitAppId),
    D3D12InitProjectId => ("NVSDK_NGX_D3D12_Init_ProjectID", D3D12, InitProjectId),
    D3D12AllocateParameters => ("NVSDK_NGX_D3D12_AllocateParameters", D3D12, AcquireParameters),
    D3D12GetCapabilityParameters => ("NVSDK_NGX_D3D12_GetCapabilityParameters", D3D12, AcquireParameters),
    D3D12GetParameters => ("NVSDK_NGX_D3D12_GetParameters", D3D12, AcquireParameters),

    VulkanInit => ("NVSDK_NGX_VULKAN_Init", Vulkan, InitAppId),
    VulkanInitExt => ("NVSDK_NGX_VULKAN_Init_Ext", Vulkan, InitAppId),
    VulkanInitExt2 => ("NVSDK_NGX_VULKAN_Init_Ext2", Vulkan, InitAppId),
    VulkanInitProjectId => ("NVSDK_NGX_VULKAN_Init_ProjectID", Vulkan, InitProjectId),
    VulkanInitProjectIdExt => ("NVSDK_NGX_VULKAN_Init_ProjectID_Ext", Vulkan, InitProjectId),
    VulkanAllocateParameters => ("NVSDK_NGX_VULKAN_AllocateParameters", Vulkan, AcquireParameters),
    VulkanGetCapabilityParameters => ("NVSDK_NGX_VULKAN_GetCapabilityParameters", Vulkan, AcquireParameters),
    VulkanGetParameters => ("NVSDK_NGX_VULKAN_GetParameters", Vulkan, AcquireParameters),
}

impl EntryPoint {
    /// Number of entry points
    pub const COUNT: usize = Self::ALL.len();

    /// Position in [`EntryPoint::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Parameter-acquisition entry points across all backends
    pub fn acquire_parameters() -> impl Iterator<Item = EntryPoint> {
        Self::ALL
            .iter()
            .copied()
            .filter(|e| e.kind() == EntryKind::AcquireParameters)
    }
}
