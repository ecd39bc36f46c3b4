pub(crate) const MAX_CALL_DEPTH: usize = 256;
pub(crate) const ARG_LIMIT: usize = 255;

pub(crate) const GC_INITIAL_THRESHOLD: usize = 1024;
pub(crate) const GC_HEAP_GROW_FACTOR: usize = 2;

pub(crate) const SOURCE_EXTENSION: &str = "tfs";
pub(crate) const MODULE_ENTRY_FILE: &str = "main.tfs";
pub(crate) const PACKAGE_DIR: &str = "Modules";
pub(crate) const STD_PREFIX: &str = "@std/";

// Hidden bindings, not valid identifiers so scripts can't shadow or reassign them
pub(crate) const LOADARGS_BINDING: &str = "@loadargs";
pub(crate) const MODULE_DIR_BINDING: &str = "@dir";
