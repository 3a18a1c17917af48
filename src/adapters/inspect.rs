//! Shared-library dependency inspection.
//!
//! Both inspectors report only direct dependencies; the packager walks the
//! closure itself so that every hop goes through the same root search.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::process::{run_tool, ToolCommand};
use super::DependencyInspector;

/// `objdump -p`, which understands both ELF and PE images
pub struct ObjdumpInspector {
    binary_path: String,
}

impl Default for ObjdumpInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjdumpInspector {
    pub fn new() -> Self {
        Self {
            binary_path: "objdump".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl DependencyInspector for ObjdumpInspector {
    fn name(&self) -> &str {
        "objdump"
    }

    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>> {
        let output = run_tool(&ToolCommand::new(&self.binary_path).arg("-p").arg(binary)).await?;
        if !output.success() {
            anyhow::bail!(
                "objdump could not read {}: {}",
                binary.display(),
                output.stderr.trim()
            );
        }
        Ok(parse_objdump(&output.stdout))
    }
}

/// MSVC `dumpbin /dependents`
pub struct DumpbinInspector {
    binary_path: String,
}

impl Default for DumpbinInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpbinInspector {
    pub fn new() -> Self {
        Self {
            binary_path: "dumpbin".to_string(),
        }
    }

    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl DependencyInspector for DumpbinInspector {
    fn name(&self) -> &str {
        "dumpbin"
    }

    async fn dependencies(&self, binary: &Path) -> Result<Vec<String>> {
        let output = run_tool(
            &ToolCommand::new(&self.binary_path)
                .arg("/nologo")
                .arg("/dependents")
                .arg(binary),
        )
        .await?;
        if !output.success() {
            anyhow::bail!(
                "dumpbin could not read {}: {}",
                binary.display(),
                output.combined().trim()
            );
        }
        Ok(parse_dumpbin(&output.stdout))
    }
}

/// Extract `NEEDED` (ELF) and `DLL Name:` (PE) entries
pub fn parse_objdump(output: &str) -> Vec<String> {
    let mut deps = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        let name = if let Some(rest) = line.strip_prefix("NEEDED") {
            rest.trim()
        } else if let Some(rest) = line.strip_prefix("DLL Name:") {
            rest.trim()
        } else {
            continue;
        };

        if !name.is_empty() && !deps.iter().any(|d: &String| d == name) {
            deps.push(name.to_string());
        }
    }

    deps
}

/// Extract the dependency list printed by `dumpbin /dependents`
pub fn parse_dumpbin(output: &str) -> Vec<String> {
    let mut deps = Vec::new();
    let mut in_list = false;

    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Image has the following") {
            in_list = true;
            continue;
        }
        if line.starts_with("Summary") {
            break;
        }
        if in_list && !line.is_empty() && !deps.iter().any(|d: &String| d == line) {
            deps.push(line.to_string());
        }
    }

    deps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_objdump_elf() {
        let output = "\
Dynamic Section:
  NEEDED               libcolmap_controllers.so
  NEEDED               libceres.so.4
  NEEDED               libc.so.6
  RUNPATH              $ORIGIN/../lib
";
        assert_eq!(
            parse_objdump(output),
            vec!["libcolmap_controllers.so", "libceres.so.4", "libc.so.6"]
        );
    }

    #[test]
    fn test_parse_objdump_pe() {
        let output = "\
The Import Tables (interpreted .idata section contents)
\tDLL Name: ceres.dll
\tvma:  Hint/Ord Member-Name Bound-To
\tDLL Name: KERNEL32.dll
\tDLL Name: ceres.dll
";
        assert_eq!(parse_objdump(output), vec!["ceres.dll", "KERNEL32.dll"]);
    }

    #[test]
    fn test_parse_dumpbin() {
        let output = "\
Dump of file glomap.exe

File Type: EXECUTABLE IMAGE

  Image has the following dependencies:

    colmap.dll
    cudart64_12.dll
    KERNEL32.dll

  Image has the following delay load dependencies:

    cudss64_0.dll

  Summary

        1000 .data
";
        assert_eq!(
            parse_dumpbin(output),
            vec!["colmap.dll", "cudart64_12.dll", "KERNEL32.dll", "cudss64_0.dll"]
        );
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_objdump("").is_empty());
        assert!(parse_dumpbin("File Type: DLL\n").is_empty());
    }
}
