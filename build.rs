//! Build script to embed Windows resource metadata into executables
//! This sets the application name shown in Task Manager

fn main() {
    #[cfg(windows)]
    {
        let target = std::env::var("CARGO_BIN_NAME").unwrap_or_default();

        let mut res = winresource::WindowsResource::new();

        res.set("ProductName", "Stream Host Launcher");
        res.set("CompanyName", "Stream Host Launcher");
        res.set("ProductVersion", env!("CARGO_PKG_VERSION"));
        res.set("FileVersion", env!("CARGO_PKG_VERSION"));

        match target.as_str() {
            "stream_host_launcher" => {
                res.set("FileDescription", "StreamHostLauncher");
                res.set("InternalName", "StreamHostLauncher");
                res.set("OriginalFilename", "StreamHostLauncher.exe");
            }
            _ => {
                res.set("FileDescription", "Stream Host Launcher");
                res.set("InternalName", "StreamHostLauncher");
            }
        }

        if let Err(e) = res.compile() {
            eprintln!("Warning: Failed to compile Windows resources: {}", e);
        }
    }
}
