//! Built-in parameter dispatch-table layout
//!
//! Slot order of the parameter object's dispatch table as observed in the
//! loader module. The runtime has kept this order so far, but it is not a
//! published contract.

/// Name of the built-in layout
pub const DEFAULT_LAYOUT_NAME: &str = "default";

/// Signed integer setter by name
pub const SLOT_SET_I: &str = "SetI";

/// Unsigned integer setter by name
pub const SLOT_SET_UI: &str = "SetUI";

/// Unsigned integer getter by name
pub const SLOT_GET_UI: &str = "GetUI";

/// Slots of the built-in layout, in table order
pub const DEFAULT_SLOTS: [&str; 17] = [
    "SetVoidPointer",
    "SetD3d12Resource",
    "SetD3d11Resource",
    SLOT_SET_I,
    SLOT_SET_UI,
    "SetD",
    "SetF",
    "SetULL",
    "GetVoidPointer",
    "GetD3d12Resource",
    "GetD3d11Resource",
    "GetI",
    SLOT_GET_UI,
    "GetD",
    "GetF",
    "GetULL",
    "Reset",
];
