use std::{fs, path::Path, process::Command, time::SystemTime};

fn main() {
  let now = SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_millis())
    .unwrap_or(0);
  println!("cargo:rustc-env=BUILD_TIME={}", now);

  println!("cargo:rerun-if-changed=.git/HEAD");
  if Path::new(".git/refs/heads").exists() {
    println!("cargo:rerun-if-changed=.git/refs/heads");
  }

  let (branch, commit) = git_info();
  let short: String = commit.chars().take(7).collect();

  println!("cargo:rustc-env=GIT_BRANCH={}", branch);
  println!("cargo:rustc-env=GIT_COMMIT_SHORT={}", short);
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn git_info() -> (String, String) {
  let mut branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
  let mut commit = git(&["rev-parse", "HEAD"]);

  // No git binary: read .git/HEAD directly.
  if branch.is_none() || commit.is_none() {
    if let Ok(head) = fs::read_to_string(".git/HEAD") {
      if let Some(ref_path) = head.strip_prefix("ref: ") {
        let ref_path = ref_path.trim();
        branch = ref_path.rsplit('/').next().map(str::to_string);
        commit = fs::read_to_string(format!(".git/{}", ref_path))
          .ok()
          .map(|c| c.trim().to_string());
      } else {
        commit = Some(head.trim().to_string());
      }
    }
  }

  (
    branch.unwrap_or_else(|| "unknown".to_string()),
    commit.unwrap_or_else(|| "unknown".to_string()),
  )
}
