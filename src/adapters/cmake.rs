//! CMake build runner.
//!
//! `cmake` targets run configure, build and install against the target's
//! own build directory; `command` targets run their argv lists verbatim
//! (after placeholder expansion) from the build directory.

use std::ffi::OsString;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::process::{run_tool, ToolCommand};
use super::{BuildContext, BuildRunner};
use crate::core::template::{expand, template_vars};
use crate::domain::{BuildSpec, Target};
use crate::error::ForgeError;

/// Toolchain variables set from the resolved configuration only; values
/// inherited from the calling shell are dropped
pub const MANAGED_ENV: &[&str] = &[
    "CMAKE_PREFIX_PATH",
    "CMAKE_TOOLCHAIN_FILE",
    "VCPKG_ROOT",
    "VCPKG_DEFAULT_TRIPLET",
    "VCPKG_INSTALLATION_ROOT",
    "CUDA_PATH",
    "CUDA_HOME",
    "CUDAToolkit_ROOT",
];

/// Build runner driving the `cmake` executable
pub struct CMakeRunner {
    binary_path: String,
}

impl Default for CMakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CMakeRunner {
    pub fn new() -> Self {
        Self::with_binary_path("cmake")
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Configure, build and install invocations for a `cmake` target
    pub fn cmake_commands(
        &self,
        target: &Target,
        args: &[String],
        ctx: &BuildContext,
    ) -> Result<Vec<(&'static str, ToolCommand)>, ForgeError> {
        let vars = template_vars(target, ctx);
        let build_dir = &target.build_path;
        let config = ctx.build_type.to_string();

        let mut configure = ToolCommand::new(&self.binary_path)
            .arg("-S")
            .arg(&target.source_path)
            .arg("-B")
            .arg(build_dir);
        if let Some(ref generator) = ctx.generator {
            configure = configure.arg("-G").arg(generator);
        }
        configure = configure
            .arg(format!("-DCMAKE_BUILD_TYPE={}", config))
            .arg(format!(
                "-DCMAKE_INSTALL_PREFIX={}",
                target.install_path.display()
            ));
        if let Some(ref toolchain) = ctx.toolchain_file {
            configure = configure.arg(format!("-DCMAKE_TOOLCHAIN_FILE={}", toolchain.display()));
        }
        if !ctx.prefix_path.is_empty() {
            let joined = ctx
                .prefix_path
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(";");
            configure = configure.arg(format!("-DCMAKE_PREFIX_PATH={}", joined));
        }
        for arg in args {
            configure = configure.arg(expand(arg, &vars).map_err(ForgeError::InvalidManifest)?);
        }

        let build = ToolCommand::new(&self.binary_path)
            .arg("--build")
            .arg(build_dir)
            .args(["--config", config.as_str()])
            .args(["--parallel".to_string(), ctx.jobs.max(1).to_string()]);

        let install = ToolCommand::new(&self.binary_path)
            .arg("--install")
            .arg(build_dir)
            .args(["--config", config.as_str()]);

        Ok(vec![
            ("configure", self.with_env(configure, ctx)?),
            ("build", self.with_env(build, ctx)?),
            ("install", self.with_env(install, ctx)?),
        ])
    }

    /// Expanded invocations for a `command` target
    pub fn step_commands(
        &self,
        target: &Target,
        steps: &[Vec<String>],
        ctx: &BuildContext,
    ) -> Result<Vec<(String, ToolCommand)>, ForgeError> {
        let vars = template_vars(target, ctx);
        let mut commands = Vec::with_capacity(steps.len());

        for (idx, step) in steps.iter().enumerate() {
            let mut argv = step
                .iter()
                .map(|a| expand(a, &vars))
                .collect::<Result<Vec<_>, _>>()
                .map_err(ForgeError::InvalidManifest)?
                .into_iter();
            let program = argv.next().ok_or_else(|| {
                ForgeError::InvalidManifest(format!(
                    "target '{}' has an empty command at step {}",
                    target.name,
                    idx + 1
                ))
            })?;

            let cmd = ToolCommand::new(&program)
                .args(argv)
                .current_dir(&target.build_path);
            commands.push((format!("step {} ({})", idx + 1, program), self.with_env(cmd, ctx)?));
        }

        Ok(commands)
    }

    fn with_env(&self, mut cmd: ToolCommand, ctx: &BuildContext) -> Result<ToolCommand, ForgeError> {
        for key in MANAGED_ENV {
            cmd = cmd.env_remove(*key);
        }
        for (key, value) in &ctx.env {
            cmd = cmd.env(key, value);
        }
        if let Some(ref cuda_root) = ctx.cuda_root {
            cmd = cmd.env("CUDA_PATH", cuda_root);
        }
        if !ctx.prefix_path.is_empty() {
            let joined: OsString = std::env::join_paths(&ctx.prefix_path)
                .map_err(|e| ForgeError::Tool(anyhow::anyhow!("Invalid prefix path: {}", e)))?;
            cmd = cmd.env("CMAKE_PREFIX_PATH", joined);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl BuildRunner for CMakeRunner {
    fn name(&self) -> &str {
        "cmake"
    }

    #[instrument(skip_all, fields(target = %target.name))]
    async fn build(&self, target: &Target, ctx: &BuildContext) -> Result<(), ForgeError> {
        tokio::fs::create_dir_all(&target.build_path).await?;

        let commands: Vec<(String, ToolCommand)> = match target.build {
            BuildSpec::Cmake { ref args } => self
                .cmake_commands(target, args, ctx)?
                .into_iter()
                .map(|(step, cmd)| (step.to_string(), cmd))
                .collect(),
            BuildSpec::Command { ref steps } => self.step_commands(target, steps, ctx)?,
        };

        for (step, cmd) in commands {
            info!(step = %step, "{}", target.name);
            let output = run_tool(&cmd).await?;
            if !output.success() {
                return Err(ForgeError::BuildCommand {
                    target: target.name.clone(),
                    step,
                    code: output.code(),
                    output: output.combined(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildType;
    use crate::domain::PackageSpec;
    use std::path::PathBuf;

    fn target(build: BuildSpec) -> Target {
        Target {
            name: "glomap".to_string(),
            description: String::new(),
            source_path: PathBuf::from("/ws/third_party/glomap"),
            install_path: PathBuf::from("/ws/install/glomap"),
            build_path: PathBuf::from("/ws/build/glomap"),
            prerequisites: vec!["colmap-for-glomap".to_string()],
            build,
            install_marker_path: PathBuf::from("/ws/install/glomap/.sfmforge-installed"),
            pins: Vec::new(),
            patches: Vec::new(),
            package: PackageSpec::default(),
            accelerated: true,
        }
    }

    fn ctx() -> BuildContext {
        BuildContext {
            build_type: BuildType::Release,
            jobs: 8,
            generator: Some("Ninja".to_string()),
            cuda: true,
            toolchain_file: Some(PathBuf::from("/vcpkg/scripts/buildsystems/vcpkg.cmake")),
            prefix_path: vec![PathBuf::from("/ws/install/colmap-for-glomap")],
            install_roots: [(
                "colmap-for-glomap".to_string(),
                PathBuf::from("/ws/install/colmap-for-glomap"),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cmake_commands() {
        let runner = CMakeRunner::new();
        let args = vec!["-DCUDA_ENABLED={cuda}".to_string()];
        let t = target(BuildSpec::Cmake { args: args.clone() });

        let commands = runner.cmake_commands(&t, &args, &ctx()).unwrap();
        let steps: Vec<_> = commands.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec!["configure", "build", "install"]);

        let configure = commands[0].1.display();
        assert!(configure.starts_with("cmake -S /ws/third_party/glomap -B /ws/build/glomap -G Ninja"));
        assert!(configure.contains("-DCMAKE_INSTALL_PREFIX=/ws/install/glomap"));
        assert!(configure.contains("-DCMAKE_TOOLCHAIN_FILE=/vcpkg/scripts/buildsystems/vcpkg.cmake"));
        assert!(configure.contains("-DCMAKE_PREFIX_PATH=/ws/install/colmap-for-glomap"));
        assert!(configure.ends_with("-DCUDA_ENABLED=ON"));

        assert_eq!(
            commands[1].1.display(),
            "cmake --build /ws/build/glomap --config Release --parallel 8"
        );
        assert!(commands[2].1.env.contains_key("CMAKE_PREFIX_PATH"));
    }

    #[test]
    fn test_inherited_toolchain_env_is_dropped() {
        let runner = CMakeRunner::new();
        let t = target(BuildSpec::Cmake { args: Vec::new() });
        let mut ctx = ctx();
        ctx.env.insert("VCPKG_DEFAULT_TRIPLET".to_string(), "x64-linux".to_string());

        for (_, cmd) in runner.cmake_commands(&t, &[], &ctx).unwrap() {
            for key in MANAGED_ENV {
                assert!(cmd.env_remove.contains(*key), "{} not removed", key);
            }
            // Values the run sets itself still reach the tool
            assert_eq!(cmd.env.get("VCPKG_DEFAULT_TRIPLET"), Some(&OsString::from("x64-linux")));
            assert!(cmd.env.contains_key("CMAKE_PREFIX_PATH"));
            assert!(!cmd.env.contains_key("VCPKG_ROOT"));
        }
    }

    #[test]
    fn test_step_commands_expand_placeholders() {
        let runner = CMakeRunner::new();
        let steps = vec![vec![
            "{python}".to_string(),
            "-m".to_string(),
            "pip".to_string(),
            "wheel".to_string(),
            "{source}".to_string(),
        ]];
        let mut c = ctx();
        c.python = "python3".to_string();

        let commands = runner
            .step_commands(&target(BuildSpec::Command { steps: steps.clone() }), &steps, &c)
            .unwrap();

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].0, "step 1 (python3)");
        assert_eq!(
            commands[0].1.display(),
            "python3 -m pip wheel /ws/third_party/glomap"
        );
        assert_eq!(commands[0].1.cwd, Some(PathBuf::from("/ws/build/glomap")));
    }

    #[test]
    fn test_unknown_placeholder_is_manifest_error() {
        let runner = CMakeRunner::new();
        let args = vec!["-DX={nope}".to_string()];
        let err = runner
            .cmake_commands(&target(BuildSpec::Cmake { args: args.clone() }), &args, &ctx())
            .unwrap_err();
        assert!(matches!(err, ForgeError::InvalidManifest(_)));
    }
}
