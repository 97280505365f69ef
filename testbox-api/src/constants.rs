/// Conventional name of a recipe file.
/// `testbox build` with no target looks for this in the current directory.
pub const MAGIC_FILENAME_RECIPE: &str = "testbox.json";

/// Default output location for images, relative to the current directory.
pub const DEFAULT_IMAGE_DIR: &str = ".testbox/image";

/// Installer timeout (seconds) set by the canonical tox recipe.
pub const PIP_DEFAULT_TIMEOUT: &str = "100";
