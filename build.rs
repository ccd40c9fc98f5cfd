//! Compiles the C shim in `csrc/` when the `mpi` feature is on.
//!
//! MPI is located through pkg-config (`MPI_PKG_CONFIG` names the package,
//! otherwise `mpich`, `ompi` and `mpi` are tried) or through the compiler
//! wrapper's `-show` output (`MPICC`, default `mpicc`). The library must
//! implement MPI 3.0: the shim relies on `MPI_Type_size_x` and
//! `MPI_Get_elements_x`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHIM: &str = "csrc/largecount.c";
const SHIM_HEADER: &str = "csrc/largecount.h";
const MIN_MPI_VERSION: u32 = 3;
const PKG_CONFIG_NAMES: &[&str] = &["mpich", "ompi", "mpi"];

fn main() {
    println!("cargo:rerun-if-changed={SHIM}");
    println!("cargo:rerun-if-changed={SHIM_HEADER}");
    println!("cargo:rerun-if-env-changed=MPI_PKG_CONFIG");
    println!("cargo:rerun-if-env-changed=MPICC");

    if env::var_os("CARGO_FEATURE_MPI").is_none() {
        return;
    }

    let mpi = locate_mpi();
    check_standard_version(&mpi);

    let mut build = cc::Build::new();
    build.file(SHIM).include("csrc").warnings(true);
    for path in &mpi.include_paths {
        build.include(path);
    }
    build.compile("largecount");

    for path in &mpi.link_paths {
        println!("cargo:rustc-link-search=native={}", path.display());
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", path.display());
    }
    for lib in &mpi.libs {
        println!("cargo:rustc-link-lib={lib}");
    }
    if let Some(version) = &mpi.version {
        println!("cargo:rustc-env=LARGECOUNT_MPI_VERSION={version}");
    }
}

/// Compiler and linker flags of one MPI installation.
struct MpiFlags {
    origin: String,
    include_paths: Vec<PathBuf>,
    link_paths: Vec<PathBuf>,
    libs: Vec<String>,
    /// Library version as reported by pkg-config.
    version: Option<String>,
}

fn locate_mpi() -> MpiFlags {
    let mut tried = Vec::new();

    // an explicit package name is the only one worth trying
    let names: Vec<String> = match env::var("MPI_PKG_CONFIG") {
        Ok(name) => vec![name],
        Err(_) => PKG_CONFIG_NAMES.iter().map(|n| n.to_string()).collect(),
    };
    for name in &names {
        match from_pkg_config(name) {
            Ok(flags) => return flags,
            Err(e) => tried.push(format!("pkg-config {name}: {e}")),
        }
    }

    let mpicc = env::var("MPICC").unwrap_or_else(|_| "mpicc".to_string());
    match from_compiler_wrapper(&mpicc) {
        Ok(flags) => return flags,
        Err(e) => tried.push(e),
    }

    panic!(
        "the `mpi` feature needs an MPI {MIN_MPI_VERSION}.0 installation; set MPI_PKG_CONFIG \
         or MPICC to point at one. Tried:\n  {}",
        tried.join("\n  ")
    );
}

fn from_pkg_config(name: &str) -> Result<MpiFlags, pkg_config::Error> {
    let lib = pkg_config::Config::new().cargo_metadata(false).probe(name)?;
    Ok(MpiFlags {
        origin: format!("pkg-config {name}"),
        include_paths: lib.include_paths,
        link_paths: lib.link_paths,
        libs: lib.libs,
        version: Some(lib.version),
    })
}

fn from_compiler_wrapper(mpicc: &str) -> Result<MpiFlags, String> {
    let output = Command::new(mpicc)
        .arg("-show")
        .output()
        .map_err(|e| format!("{mpicc} -show: {e}"))?;
    if !output.status.success() {
        return Err(format!("{mpicc} -show: exited with {}", output.status));
    }

    let mut flags = MpiFlags {
        origin: format!("{mpicc} -show"),
        include_paths: Vec::new(),
        link_paths: Vec::new(),
        libs: Vec::new(),
        version: None,
    };
    for word in String::from_utf8_lossy(&output.stdout).split_whitespace() {
        if let Some(path) = word.strip_prefix("-I") {
            flags.include_paths.push(PathBuf::from(path));
        } else if let Some(path) = word.strip_prefix("-L") {
            flags.link_paths.push(PathBuf::from(path));
        } else if let Some(lib) = word.strip_prefix("-l") {
            flags.libs.push(lib.to_string());
        }
    }
    if flags.libs.is_empty() {
        flags.libs.push("mpi".to_string());
    }
    Ok(flags)
}

/// Refuse libraries older than MPI 3.0 before the compiler does.
///
/// Reads `MPI_VERSION` out of the first `mpi.h` on the include path. When no
/// header is found there (compiler default paths), the `#error` guard in the
/// shim catches an old library instead.
fn check_standard_version(mpi: &MpiFlags) {
    let Some((header, version)) = mpi
        .include_paths
        .iter()
        .map(|dir| dir.join("mpi.h"))
        .find_map(|header| standard_version(&header).map(|v| (header, v)))
    else {
        return;
    };
    if version < MIN_MPI_VERSION {
        panic!(
            "{} (found via {}) declares MPI_VERSION {version}; largecount needs MPI \
             {MIN_MPI_VERSION}.0 or newer",
            header.display(),
            mpi.origin
        );
    }
}

fn standard_version(header: &Path) -> Option<u32> {
    let text = fs::read_to_string(header).ok()?;
    text.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("#define"), Some("MPI_VERSION"), Some(v)) => v.parse().ok(),
            _ => None,
        }
    })
}
