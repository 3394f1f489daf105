use serde::{Deserialize, Serialize};

/// Marker carrying elapsed init time, written to stderr by every entrypoint.
pub const INIT_TIME_MARKER: &str = "IGNITE_INIT_TIME:";
/// Marker carrying heap usage in MB, written to stderr by every entrypoint.
pub const MEMORY_MARKER: &str = "IGNITE_MEMORY_MB:";

/// Unprivileged user the generated images run as.
const IMAGE_USER: &str = "ignite";

/// Package manager used to install service dependencies at build time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    #[default]
    Bun,
    None,
}

impl PackageManager {
    fn lockfile_glob(self) -> Option<&'static str> {
        match self {
            Self::Npm => Some("package-lock.json*"),
            Self::Yarn => Some("yarn.lock*"),
            Self::Pnpm => Some("pnpm-lock.yaml*"),
            Self::Bun => Some("bun.lockb*"),
            Self::None => None,
        }
    }

    fn install_command(self) -> &'static str {
        match self {
            Self::Npm => "npm ci --omit=dev 2>/dev/null || npm install --omit=dev",
            Self::Yarn => {
                "yarn install --production --frozen-lockfile 2>/dev/null || yarn install --production"
            }
            Self::Pnpm => "pnpm install --prod --frozen-lockfile 2>/dev/null || pnpm install --prod",
            Self::Bun => {
                "bun install --production --frozen-lockfile 2>/dev/null || bun install --production"
            }
            Self::None => "true",
        }
    }
}

/// Recipe parameters for runtimes built from a single official base image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatedRecipe {
    pub base_image: String,
    #[serde(default)]
    pub package_manager: PackageManager,
    /// Overrides the package manager's install command
    #[serde(default)]
    pub install_command: Option<String>,
    /// Interpreter command; split on whitespace into the exec-form CMD
    pub run_command: String,
    /// Extension of the materialized entrypoint (default: ts for bun, mjs otherwise)
    #[serde(default)]
    pub entrypoint_ext: Option<String>,
    /// Replaces the standard instrumented entrypoint script
    #[serde(default)]
    pub custom_entrypoint: Option<String>,
}

/// How a plugin produces its build recipe.
#[derive(Debug, Clone)]
pub enum RecipeKind {
    Templated(TemplatedRecipe),
    /// QuickJS has no official image; it is compiled in a builder stage.
    QuickJs,
}

/// A runtime definition: metadata plus a recipe generator.
#[derive(Debug, Clone)]
pub struct RuntimePlugin {
    pub name: String,
    pub supported_versions: Option<Vec<String>>,
    pub default_version: Option<String>,
    pub default_entry: String,
    pub file_extensions: Vec<String>,
    pub recipe: RecipeKind,
}

impl RuntimePlugin {
    pub fn templated(
        name: impl Into<String>,
        default_entry: impl Into<String>,
        file_extensions: &[&str],
        recipe: TemplatedRecipe,
    ) -> Self {
        Self {
            name: name.into(),
            supported_versions: None,
            default_version: None,
            default_entry: default_entry.into(),
            file_extensions: file_extensions.iter().map(|s| s.to_string()).collect(),
            recipe: RecipeKind::Templated(recipe),
        }
    }

    pub fn with_versions(mut self, supported: &[&str], default: &str) -> Self {
        self.supported_versions = Some(supported.iter().map(|s| s.to_string()).collect());
        self.default_version = Some(default.to_string());
        self
    }

    /// Generate the container build recipe (Dockerfile) for a version.
    pub fn generate_recipe(&self, version: Option<&str>) -> String {
        match &self.recipe {
            RecipeKind::Templated(recipe) => templated_recipe(recipe, &self.default_entry, version),
            RecipeKind::QuickJs => quickjs_recipe(&self.default_entry),
        }
    }

    /// The generated recipe must default to the entry file advertised here.
    pub fn is_consistent(&self) -> bool {
        !self.name.is_empty()
            && !self.default_entry.is_empty()
            && self
                .generate_recipe(self.default_version.as_deref())
                .contains(&format!("ARG ENTRY_FILE={}\n", self.default_entry))
    }
}

fn node_style_entrypoint(default_entry: &str) -> String {
    format!(
        r#"const entryFile = process.env.ENTRY_FILE || "{default_entry}";
const startTime = Date.now();

async function run() {{
  try {{
    await import("/app/" + entryFile);
  }} catch (err) {{
    console.error(err);
    process.exitCode = 1;
  }}
}}

run().finally(() => {{
  const initTime = Date.now() - startTime;
  const mem = Math.round(process.memoryUsage().heapUsed / 1024 / 1024 * 100) / 100;
  process.stderr.write("{INIT_TIME_MARKER}" + initTime + "\n");
  process.stderr.write("{MEMORY_MARKER}" + mem + "\n");
}});"#
    )
}

fn quickjs_entrypoint(default_entry: &str) -> String {
    format!(
        r#"const entryFile = std.getenv("ENTRY_FILE") || "{default_entry}";
const startTime = Date.now();
let failed = false;

try {{
  std.loadScript("/app/" + entryFile);
}} catch (err) {{
  std.err.puts(String(err) + "\n");
  failed = true;
}}

const initTime = Date.now() - startTime;
std.err.puts("{INIT_TIME_MARKER}" + initTime + "\n");
std.err.puts("{MEMORY_MARKER}0\n");
std.exit(failed ? 1 : 0);"#
    )
}

/// Replace the tag of an image reference with `version`, keeping an
/// `-alpine` suffix or `alpine-` prefix. References without a trailing tag
/// are untouched.
pub fn substitute_image_version(base_image: &str, version: &str) -> String {
    let Some(colon) = base_image.rfind(':') else {
        return base_image.to_string();
    };
    let tag = &base_image[colon + 1..];
    let is_tag = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !is_tag {
        return base_image.to_string();
    }

    let repo = &base_image[..colon];
    if tag.starts_with("alpine-") {
        format!("{}:alpine-{}", repo, version)
    } else if tag.ends_with("-alpine") {
        format!("{}:{}-alpine", repo, version)
    } else {
        format!("{}:{}", repo, version)
    }
}

/// Render a script as a `RUN printf` step writing it to `target`, one
/// single-quoted line per argument.
fn materialize_script(script: &str, target: &str) -> String {
    let mut out = String::from("RUN printf '%s\\n' \\\n");
    for line in script.lines() {
        out.push_str("  '");
        out.push_str(&line.replace('\'', "'\\''"));
        out.push_str("' \\\n");
    }
    out.push_str(&format!(
        "  > {target} && chown {IMAGE_USER}:{IMAGE_USER} {target}\n"
    ));
    out
}

fn exec_form(command: &[&str]) -> String {
    serde_json::to_string(command).unwrap_or_else(|_| "[]".to_string())
}

fn templated_recipe(recipe: &TemplatedRecipe, default_entry: &str, version: Option<&str>) -> String {
    let base_image = match version {
        Some(version) => substitute_image_version(&recipe.base_image, version),
        None => recipe.base_image.clone(),
    };

    let pm = recipe.package_manager;
    let copy_manifest = match pm.lockfile_glob() {
        Some(glob) => format!("COPY package.json {glob} ./"),
        None => "COPY package.json* ./".to_string(),
    };
    let install_step = if pm == PackageManager::None {
        String::new()
    } else {
        let install = recipe
            .install_command
            .as_deref()
            .unwrap_or_else(|| pm.install_command());
        format!("RUN if [ -f package.json ]; then {install}; fi")
    };

    let ext = recipe.entrypoint_ext.clone().unwrap_or_else(|| {
        if pm == PackageManager::Bun {
            "ts".to_string()
        } else {
            "mjs".to_string()
        }
    });
    let entrypoint_path = format!("/entrypoint.{ext}");
    let script = recipe
        .custom_entrypoint
        .clone()
        .unwrap_or_else(|| node_style_entrypoint(default_entry));

    let mut command: Vec<&str> = recipe.run_command.split_whitespace().collect();
    command.push(&entrypoint_path);

    format!(
        "FROM {base_image}\n\
         \n\
         RUN adduser -D -u 1001 {IMAGE_USER}\n\
         \n\
         WORKDIR /app\n\
         \n\
         {copy_manifest}\n\
         {install_step}\n\
         \n\
         COPY --chown={IMAGE_USER}:{IMAGE_USER} . .\n\
         \n\
         ARG ENTRY_FILE={default_entry}\n\
         ENV ENTRY_FILE=${{ENTRY_FILE}}\n\
         \n\
         {materialize}\
         \n\
         USER {IMAGE_USER}\n\
         \n\
         CMD {cmd}\n",
        materialize = materialize_script(&script, &entrypoint_path),
        cmd = exec_form(&command),
    )
}

fn quickjs_recipe(default_entry: &str) -> String {
    format!(
        "FROM alpine:3.19 AS builder\n\
         \n\
         RUN apk add --no-cache git make gcc musl-dev\n\
         \n\
         WORKDIR /build\n\
         RUN git clone --depth 1 https://github.com/bellard/quickjs.git . && \\\n    \
         make qjs && \\\n    \
         strip qjs\n\
         \n\
         FROM alpine:3.19\n\
         \n\
         RUN adduser -D -u 1001 {IMAGE_USER}\n\
         \n\
         COPY --from=builder /build/qjs /usr/local/bin/qjs\n\
         \n\
         WORKDIR /app\n\
         \n\
         COPY --chown={IMAGE_USER}:{IMAGE_USER} . .\n\
         \n\
         ARG ENTRY_FILE={default_entry}\n\
         ENV ENTRY_FILE=${{ENTRY_FILE}}\n\
         \n\
         {materialize}\
         \n\
         USER {IMAGE_USER}\n\
         \n\
         CMD {cmd}\n",
        materialize = materialize_script(&quickjs_entrypoint(default_entry), "/entrypoint.js"),
        cmd = exec_form(&["qjs", "--std", "/entrypoint.js"]),
    )
}

pub fn bun() -> RuntimePlugin {
    RuntimePlugin::templated(
        "bun",
        "index.ts",
        &[".ts", ".js", ".tsx", ".jsx"],
        TemplatedRecipe {
            base_image: "oven/bun:1.3-alpine".to_string(),
            package_manager: PackageManager::Bun,
            install_command: None,
            run_command: "bun".to_string(),
            entrypoint_ext: Some("ts".to_string()),
            custom_entrypoint: None,
        },
    )
    .with_versions(&["1.0", "1.1", "1.2", "1.3"], "1.3")
}

pub fn node() -> RuntimePlugin {
    RuntimePlugin::templated(
        "node",
        "index.js",
        &[".js", ".mjs", ".cjs"],
        TemplatedRecipe {
            base_image: "node:20-alpine".to_string(),
            package_manager: PackageManager::Npm,
            install_command: None,
            run_command: "node".to_string(),
            entrypoint_ext: Some("mjs".to_string()),
            custom_entrypoint: None,
        },
    )
    .with_versions(&["18", "20", "22"], "20")
}

pub fn deno() -> RuntimePlugin {
    RuntimePlugin::templated(
        "deno",
        "index.ts",
        &[".ts", ".js", ".tsx", ".jsx"],
        TemplatedRecipe {
            base_image: "denoland/deno:alpine-2.0".to_string(),
            package_manager: PackageManager::None,
            install_command: None,
            run_command: "deno run --allow-env --allow-read=/app".to_string(),
            entrypoint_ext: Some("ts".to_string()),
            custom_entrypoint: None,
        },
    )
    .with_versions(&["1.40", "1.41", "1.42", "2.0"], "2.0")
}

pub fn quickjs() -> RuntimePlugin {
    RuntimePlugin {
        name: "quickjs".to_string(),
        supported_versions: Some(vec![
            "2024-01-13".to_string(),
            "2023-12-09".to_string(),
            "latest".to_string(),
        ]),
        default_version: Some("latest".to_string()),
        default_entry: "index.js".to_string(),
        file_extensions: vec![".js".to_string()],
        recipe: RecipeKind::QuickJs,
    }
}

pub fn builtin_plugins() -> Vec<RuntimePlugin> {
    vec![bun(), node(), deno(), quickjs()]
}
