use which::which;

fn main() {
    // Rebuild when the linker changes; host-only builds may not have it installed.
    if let Ok(bpf_linker) = which("bpf-linker") {
        println!("cargo:rerun-if-changed={}", bpf_linker.display());
    }
}
