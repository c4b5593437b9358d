use crate::features::remote_exec::repo::shell_quote;

pub const INSTALL_UNZIP: &str =
    "sudo apt-get update && sudo DEBIAN_FRONTEND=noninteractive apt-get install -y unzip";

/// Remote commands that fetch, unpack and launch a workload package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningPlan {
    pub package_url: String,
    pub archive_path: String,
    pub extract_dir: String,
}

impl ProvisioningPlan {
    pub fn new(blob_store_url: &str, remote_workdir: &str, blob_id: &str) -> Self {
        let workdir = remote_workdir.trim_end_matches('/');
        Self {
            package_url: format!(
                "{}/v1/blobs/by-object-id/{}",
                blob_store_url.trim_end_matches('/'),
                blob_id
            ),
            archive_path: format!("{workdir}/model.zip"),
            extract_dir: format!("{workdir}/model"),
        }
    }

    pub fn download(&self) -> String {
        format!(
            "curl -L {} -o {}",
            shell_quote(&self.package_url),
            shell_quote(&self.archive_path)
        )
    }

    pub fn extract(&self) -> String {
        format!(
            "unzip -o {} -d {}",
            shell_quote(&self.archive_path),
            shell_quote(&self.extract_dir)
        )
    }

    pub fn find_scripts(&self) -> String {
        format!(
            "find {} -type f -name '*.sh' | sort",
            shell_quote(&self.extract_dir)
        )
    }

    pub fn make_executable(script: &str) -> String {
        format!("chmod +x {}", shell_quote(script))
    }

    /// Runs from the script's own directory so relative paths inside the
    /// package resolve.
    pub fn run_script(script: &str) -> String {
        let dir = match script.rfind('/') {
            Some(0) => "/",
            Some(idx) => &script[..idx],
            None => ".",
        };
        format!("cd {} && bash {}", shell_quote(dir), shell_quote(script))
    }
}

/// Scripts listed by the search step, in the order they were printed.
pub fn listed_scripts(stdout: &str) -> Vec<&str> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}
