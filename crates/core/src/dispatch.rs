//! Parameter-object dispatch tables
//!
//! A parameter object starts with a pointer to a table of function pointers
//! whose order is a convention of the runtime, not a contract. The order is
//! described as a named slot list ([`DispatchLayout`]); the slot offset is
//! its index times the pointer width. Additional layouts can be supplied in
//! `ngxtweaks_layouts.json`:
//!
//! ```json
//! {
//!     "ngx-next": { "slots": ["SetVoidPointer", "SetI", "SetUI", "GetUI"] }
//! }
//! ```
//!
//! Anything unexpected in a table (null pointer, unreadable table, slot not
//! pointing at code, two slots sharing one function) is a layout mismatch:
//! nothing is intercepted and a later object may be tried again.

use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

use ngxtweaks_sdk::layout::{DEFAULT_LAYOUT_NAME, DEFAULT_SLOTS, SLOT_GET_UI, SLOT_SET_I, SLOT_SET_UI};
use ngxtweaks_sdk::NgxParameter;

use crate::context::{HookSlot, TweakContext};
use crate::hooks::{HookError, HookKey};

/// Layout description and validation errors
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("Failed to read layouts file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse layouts JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Layout '{layout}' has no {slot} slot")]
    MissingSlot { layout: String, slot: &'static str },

    #[error("Layout '{layout}' lists {slot} more than once")]
    DuplicateSlot { layout: String, slot: String },

    #[error("Parameter object has no dispatch table")]
    NullTable,

    #[error("Dispatch table at {0:#x} is not readable")]
    UnreadableTable(usize),

    #[error("Slot {slot} is null")]
    NullSlot { slot: &'static str },

    #[error("Slot {slot} points at non-executable memory {address:#x}")]
    NotExecutable { slot: &'static str, address: usize },

    #[error("Slots {first} and {second} share function {address:#x}")]
    AliasedSlots {
        first: &'static str,
        second: &'static str,
        address: usize,
    },
}

/// Failure to intercept a parameter table
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Layout mismatch: {0}")]
    Layout(#[from] LayoutError),

    #[error("Failed to intercept {slot}: {source}")]
    Intercept {
        slot: &'static str,
        #[source]
        source: HookError,
    },
}

/// Ordered slot names of one dispatch-table version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchLayout {
    name: String,
    slots: Vec<String>,
}

/// Table indices of the intercepted slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredSlots {
    pub set_i: usize,
    pub set_ui: usize,
    pub get_ui: usize,
}

impl DispatchLayout {
    /// Describe a layout, rejecting duplicate names and missing required slots
    pub fn new(name: impl Into<String>, slots: Vec<String>) -> Result<Self, LayoutError> {
        let layout = Self {
            name: name.into(),
            slots,
        };

        for (index, slot) in layout.slots.iter().enumerate() {
            if layout.slots[..index].contains(slot) {
                return Err(LayoutError::DuplicateSlot {
                    layout: layout.name.clone(),
                    slot: slot.clone(),
                });
            }
        }
        layout.required()?;

        Ok(layout)
    }

    /// The layout observed in shipping runtimes
    pub fn builtin() -> Self {
        Self {
            name: DEFAULT_LAYOUT_NAME.to_string(),
            slots: DEFAULT_SLOTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots described
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn index_of(&self, slot: &str) -> Option<usize> {
        self.slots.iter().position(|s| s == slot)
    }

    /// Byte offset of a slot from the start of the table
    #[cfg(test)]
    fn offset_of(&self, slot: &str) -> Option<usize> {
        self.index_of(slot)
            .map(|index| index * std::mem::size_of::<usize>())
    }

    pub fn required(&self) -> Result<RequiredSlots, LayoutError> {
        let find = |slot: &'static str| {
            self.index_of(slot).ok_or_else(|| LayoutError::MissingSlot {
                layout: self.name.clone(),
                slot,
            })
        };

        Ok(RequiredSlots {
            set_i: find(SLOT_SET_I)?,
            set_ui: find(SLOT_SET_UI)?,
            get_ui: find(SLOT_GET_UI)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LayoutEntry {
    slots: Vec<String>,
}

/// Known layouts, selected by name
#[derive(Debug, Clone)]
pub struct LayoutCatalog {
    default: DispatchLayout,
    named: HashMap<String, DispatchLayout>,
}

impl Default for LayoutCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LayoutCatalog {
    /// Only the built-in layout
    pub fn builtin() -> Self {
        Self {
            default: DispatchLayout::builtin(),
            named: HashMap::new(),
        }
    }

    /// Load layouts from a JSON file on top of the built-in one
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load layouts from a JSON string on top of the built-in one
    pub fn load_from_str(json: &str) -> Result<Self, LayoutError> {
        let raw: HashMap<String, LayoutEntry> = serde_json::from_str(json)?;

        let mut catalog = Self::builtin();
        for (name, entry) in raw {
            let layout = DispatchLayout::new(name.clone(), entry.slots)?;
            catalog.named.insert(name, layout);
        }

        tracing::info!("Loaded {} dispatch layout(s)", catalog.named.len());
        Ok(catalog)
    }

    /// Layout by name; unknown names fall back to the built-in layout
    pub fn select(&self, name: &str) -> &DispatchLayout {
        match self.named.get(name) {
            Some(layout) => layout,
            None => {
                if name != DEFAULT_LAYOUT_NAME {
                    tracing::warn!("Unknown dispatch layout '{}', using built-in", name);
                }
                &self.default
            }
        }
    }
}

/// Validated targets of the intercepted slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSlots {
    pub set_i: NonNull<c_void>,
    pub set_ui: NonNull<c_void>,
    pub get_ui: NonNull<c_void>,
}

/// Dispatch table of a parameter object (null if the object is null)
///
/// # Safety
/// `object` must be null or point at a live parameter object.
pub unsafe fn table_of(object: *const NgxParameter) -> *const *const c_void {
    if object.is_null() {
        std::ptr::null()
    } else {
        (*object).vtable
    }
}

fn ensure_executable(slot: &'static str, address: NonNull<c_void>) -> Result<(), LayoutError> {
    let executable = region::query(address.as_ptr() as *const u8)
        .map(|region| region.is_executable())
        .unwrap_or(false);

    if executable {
        Ok(())
    } else {
        Err(LayoutError::NotExecutable {
            slot,
            address: address.as_ptr() as usize,
        })
    }
}

/// Read and validate the intercepted slots of `table` under `layout`
///
/// # Safety
/// `table` must be null or the dispatch table of a live parameter object.
pub unsafe fn read_table(
    layout: &DispatchLayout,
    table: *const *const c_void,
) -> Result<TableSlots, LayoutError> {
    let required = layout.required()?;
    if table.is_null() {
        return Err(LayoutError::NullTable);
    }

    let bytes = layout.len() * std::mem::size_of::<usize>();
    let readable = region::query_range(table as *const u8, bytes)
        .map(|regions| regions.into_iter().all(|r| r.is_ok_and(|r| r.is_readable())))
        .unwrap_or(false);
    if !readable {
        return Err(LayoutError::UnreadableTable(table as usize));
    }

    let read = |slot: &'static str, index: usize| {
        let address = NonNull::new(*table.add(index) as *mut c_void)
            .ok_or(LayoutError::NullSlot { slot })?;
        ensure_executable(slot, address)?;
        Ok::<_, LayoutError>(address)
    };

    let slots = TableSlots {
        set_i: read(SLOT_SET_I, required.set_i)?,
        set_ui: read(SLOT_SET_UI, required.set_ui)?,
        get_ui: read(SLOT_GET_UI, required.get_ui)?,
    };

    let named = [
        (SLOT_SET_I, slots.set_i),
        (SLOT_SET_UI, slots.set_ui),
        (SLOT_GET_UI, slots.get_ui),
    ];
    for (i, (first, a)) in named.iter().enumerate() {
        if let Some((second, _)) = named[i + 1..].iter().find(|(_, b)| b == a) {
            return Err(LayoutError::AliasedSlots {
                first: *first,
                second: *second,
                address: a.as_ptr() as usize,
            });
        }
    }

    Ok(slots)
}

impl TweakContext {
    /// Intercept the setter and getter slots of a parameter dispatch table
    ///
    /// Runs at most once per process. Later calls return `Ok` without
    /// touching anything. On a layout mismatch or install failure nothing
    /// stays installed and the next table is tried again. On success the
    /// parameter-acquisition intercepts are disabled.
    ///
    /// # Safety
    /// `table` must be null or the dispatch table of a live parameter object.
    pub unsafe fn hook_parameter_table(
        &self,
        table: *const *const c_void,
    ) -> Result<(), DispatchError> {
        let mut params = self.params.lock();
        if params.hooked {
            return Ok(());
        }

        let settings = self.settings();
        let layout = self.layouts().select(&settings.layout);
        let slots = read_table(layout, table)?;

        let targets = [
            (HookSlot::SetI, slots.set_i),
            (HookSlot::SetUI, slots.set_ui),
            (HookSlot::GetUI, slots.get_ui),
        ];

        let mut keys = Vec::with_capacity(targets.len());
        for (slot, target) in targets {
            let created = self.primitive.create(
                slot.name(),
                target.as_ptr() as *const (),
                self.detours().get(slot),
            );
            match created {
                Ok((key, original)) => {
                    self.originals().store(slot, original);
                    keys.push(key);
                }
                Err(source) => {
                    self.discard(&keys);
                    return Err(DispatchError::Intercept {
                        slot: slot.name(),
                        source,
                    });
                }
            }
        }

        for (slot, &key) in targets.iter().map(|(slot, _)| slot).zip(&keys) {
            if let Err(source) = self.primitive.enable(key) {
                self.discard(&keys);
                return Err(DispatchError::Intercept {
                    slot: slot.name(),
                    source,
                });
            }
        }

        params.hooked = true;
        params.keys = keys;

        tracing::info!(
            "Parameter table {:p} intercepted using layout '{}'",
            table,
            layout.name()
        );
        tracing::info!("Settings:\n{}", settings);

        let discovery = self.discovery.lock();
        for &key in &discovery.acquire_hooks {
            if let Err(e) = self.primitive.disable(key) {
                tracing::warn!("Failed to disable parameter acquisition hook: {}", e);
            }
        }

        Ok(())
    }

    /// Called with every parameter object an acquisition entry point returns
    ///
    /// # Safety
    /// `object` must be null or point at a live parameter object.
    pub unsafe fn on_parameters_acquired(&self, object: *const NgxParameter) {
        if object.is_null() || self.is_shutting_down() || self.params_hooked() {
            return;
        }

        if let Err(e) = self.hook_parameter_table(table_of(object)) {
            tracing::error!("Parameter table not intercepted: {}", e);
        }
    }

    pub(crate) fn discard(&self, keys: &[HookKey]) {
        for &key in keys {
            if let Err(e) = self.primitive.remove(key) {
                tracing::warn!("Failed to remove intercept: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::*;
    use crate::policy::OverrideSettings;

    extern "C" fn fake_set_i() -> usize {
        0x5E71
    }

    extern "C" fn fake_set_ui() -> usize {
        0x5E70
    }

    extern "C" fn fake_get_ui() -> usize {
        0x6E70
    }

    extern "C" fn other_get_ui() -> usize {
        0x0E70
    }

    /// Table of the built-in layout with only the intercepted slots filled
    fn table(set_i: usize, set_ui: usize, get_ui: usize) -> Vec<usize> {
        let mut table = vec![0; DEFAULT_SLOTS.len()];
        table[3] = set_i;
        table[4] = set_ui;
        table[12] = get_ui;
        table
    }

    fn ptr(table: &[usize]) -> *const *const c_void {
        table.as_ptr() as *const *const c_void
    }

    fn valid_table() -> Vec<usize> {
        table(
            fake_set_i as usize,
            fake_set_ui as usize,
            fake_get_ui as usize,
        )
    }

    #[test]
    fn test_builtin_layout_slots() {
        let layout = DispatchLayout::builtin();
        assert_eq!(layout.len(), 17);
        assert_eq!(
            layout.required().unwrap(),
            RequiredSlots {
                set_i: 3,
                set_ui: 4,
                get_ui: 12
            }
        );
        assert_eq!(layout.offset_of("GetUI"), Some(12 * std::mem::size_of::<usize>()));
        assert_eq!(layout.offset_of("Nope"), None);
    }

    #[test]
    fn test_layout_validation() {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert!(DispatchLayout::new("ok", names(&["GetUI", "SetUI", "SetI"])).is_ok());
        assert!(matches!(
            DispatchLayout::new("missing", names(&["SetI", "SetUI"])),
            Err(LayoutError::MissingSlot { slot: "GetUI", .. })
        ));
        assert!(matches!(
            DispatchLayout::new("dup", names(&["SetI", "SetUI", "GetUI", "SetI"])),
            Err(LayoutError::DuplicateSlot { .. })
        ));
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = LayoutCatalog::load_from_str(
            r#"{ "swapped": { "slots": ["Reset", "GetUI", "SetUI", "SetI"] } }"#,
        )
        .unwrap();

        let swapped = catalog.select("swapped");
        assert_eq!(swapped.required().unwrap().get_ui, 1);
        assert_eq!(catalog.select("unknown").name(), DEFAULT_LAYOUT_NAME);
        assert_eq!(catalog.select(DEFAULT_LAYOUT_NAME), &DispatchLayout::builtin());

        assert!(LayoutCatalog::load_from_str(r#"{ "bad": { "slots": ["SetI"] } }"#).is_err());
        assert!(LayoutCatalog::load_from_str("not json").is_err());
    }

    #[test]
    fn test_read_table_valid() {
        let table = valid_table();
        let slots = unsafe { read_table(&DispatchLayout::builtin(), ptr(&table)) }.unwrap();
        assert_eq!(slots.set_i.as_ptr() as usize, fake_set_i as usize);
        assert_eq!(slots.get_ui.as_ptr() as usize, fake_get_ui as usize);
    }

    #[test]
    fn test_read_table_mismatches() {
        let layout = DispatchLayout::builtin();

        let result = unsafe { read_table(&layout, std::ptr::null()) };
        assert!(matches!(result, Err(LayoutError::NullTable)));

        let null_slot = table(fake_set_i as usize, 0, fake_get_ui as usize);
        let result = unsafe { read_table(&layout, ptr(&null_slot)) };
        assert!(matches!(result, Err(LayoutError::NullSlot { slot: "SetUI" })));

        let data = vec![0u8; 64];
        let not_code = table(fake_set_i as usize, fake_set_ui as usize, data.as_ptr() as usize);
        let result = unsafe { read_table(&layout, ptr(&not_code)) };
        assert!(matches!(result, Err(LayoutError::NotExecutable { slot: "GetUI", .. })));

        let aliased = table(fake_set_i as usize, fake_set_i as usize, fake_get_ui as usize);
        let result = unsafe { read_table(&layout, ptr(&aliased)) };
        assert!(matches!(result, Err(LayoutError::AliasedSlots { .. })));
    }

    #[test]
    fn test_hooks_three_slots_and_retires_acquisition_hooks() {
        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());
        let acquire = HookKey::Inline(crate::hooks::InlineHookKey::default());
        context.discovery.lock().acquire_hooks = vec![acquire];

        let table = valid_table();
        unsafe { context.hook_parameter_table(ptr(&table)) }.unwrap();
        assert!(context.params_hooked());

        let calls = calls.lock();
        assert_eq!(
            created(&calls),
            vec![
                "NVSDK_NGX_Parameter::SetI",
                "NVSDK_NGX_Parameter::SetUI",
                "NVSDK_NGX_Parameter::GetUI"
            ]
        );
        assert!(calls.contains(&Call::Create {
            name: "NVSDK_NGX_Parameter::GetUI".into(),
            target: fake_get_ui as usize,
            detour: context.detours().get(HookSlot::GetUI) as usize,
        }));
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Enable(_))).count(), 3);
        assert_eq!(calls.last(), Some(&Call::Disable(acquire)));

        let original = context.originals().load(HookSlot::SetUI).unwrap();
        assert_eq!(original.as_ptr() as usize, fake_set_ui as usize + 1);
    }

    #[test]
    fn test_null_slot_leaves_flag_clear_for_retry() {
        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());

        let broken = table(fake_set_i as usize, fake_set_ui as usize, 0);
        let result = unsafe { context.hook_parameter_table(ptr(&broken)) };
        assert!(matches!(result, Err(DispatchError::Layout(LayoutError::NullSlot { .. }))));
        assert!(!context.params_hooked());
        assert!(calls.lock().is_empty());

        let table = valid_table();
        unsafe { context.hook_parameter_table(ptr(&table)) }.unwrap();
        assert!(context.params_hooked());
    }

    #[test]
    fn test_install_failure_discards_partial_hooks() {
        let primitive = FakePrimitive::failing_at(fake_get_ui as usize);
        let (context, calls, _) = context_with(OverrideSettings::default(), primitive);

        let table = valid_table();
        let result = unsafe { context.hook_parameter_table(ptr(&table)) };
        assert!(matches!(result, Err(DispatchError::Intercept { slot: "NVSDK_NGX_Parameter::GetUI", .. })));
        assert!(!context.params_hooked());

        let calls = calls.lock();
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Remove(_))).count(), 2);
        assert!(!calls.iter().any(|c| matches!(c, Call::Enable(_))));
    }

    #[test]
    fn test_concurrent_first_use_hooks_once() {
        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());
        let first = valid_table();
        let second = table(
            fake_set_i as usize,
            fake_set_ui as usize,
            other_get_ui as usize,
        );

        std::thread::scope(|scope| {
            for i in 0..8 {
                let table = if i % 2 == 0 { &first } else { &second };
                let context = &context;
                scope.spawn(move || unsafe {
                    context.hook_parameter_table(ptr(&table)).unwrap();
                });
            }
        });

        assert!(context.params_hooked());
        assert_eq!(created(&calls.lock()).len(), 3);
    }

    #[test]
    fn test_selected_layout_is_used() {
        let catalog = LayoutCatalog::load_from_str(
            r#"{ "short": { "slots": ["GetUI", "SetUI", "SetI"] } }"#,
        )
        .unwrap();
        let settings = OverrideSettings {
            layout: "short".into(),
            ..OverrideSettings::default()
        };
        let (context, calls, _) = context_with(settings, FakePrimitive::default());
        let context = context.with_layouts(catalog);

        let table = vec![fake_get_ui as usize, fake_set_ui as usize, fake_set_i as usize];
        unsafe { context.hook_parameter_table(ptr(&table)) }.unwrap();

        assert!(calls.lock().contains(&Call::Create {
            name: "NVSDK_NGX_Parameter::SetI".into(),
            target: fake_set_i as usize,
            detour: context.detours().get(HookSlot::SetI) as usize,
        }));
    }

    #[test]
    fn test_no_table_hooked_after_shutdown() {
        let table = valid_table();
        let object = NgxParameter {
            vtable: ptr(&table),
        };

        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());
        context.begin_shutdown();
        unsafe { context.on_parameters_acquired(&object) };
        assert!(calls.lock().is_empty());
        assert!(!context.params_hooked());

        let (running, _, _) = context_with(OverrideSettings::default(), FakePrimitive::default());
        unsafe { running.on_parameters_acquired(&object) };
        assert!(running.params_hooked());
    }

    #[test]
    fn test_acquired_null_object_is_ignored() {
        let (context, calls, _) = context_with(OverrideSettings::default(), FakePrimitive::default());
        unsafe { context.on_parameters_acquired(std::ptr::null()) };
        assert!(calls.lock().is_empty());
        assert!(!context.params_hooked());
    }
}
