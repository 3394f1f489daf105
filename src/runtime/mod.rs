mod plugin;
mod registry;
mod spec;

pub use plugin::{
    builtin_plugins, substitute_image_version, PackageManager, RecipeKind, RuntimePlugin,
    TemplatedRecipe, INIT_TIME_MARKER, MEMORY_MARKER,
};
pub use registry::{ResolvedRuntime, RuntimeRegistry};
pub use spec::{version_matches, RuntimeSpec};
