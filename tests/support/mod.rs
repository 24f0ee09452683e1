/*!
Test support helpers shared across integration tests.

- write_executable_script(path, body): write a script and chmod 0755
- FakeEngine: a POSIX sh stand-in for podman/docker driven by marker files

The fake engine keeps its state in `<root>/state` and treats `<root>/fs` as the
container filesystem. Every invocation is appended to `<root>/state/calls.log`.
*/
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use als_exec::{ContainerEngine, Engine, EngineSelector};

pub const IMAGE: &str = "quay.io/ansible/creator-ee:latest";
pub const IMAGE_ID: &str = "a1b2c3d4e5f6";

pub fn write_executable_script(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("script dir");
    }
    fs::write(path, body).expect("write script");
    let mut perm = fs::metadata(path).expect("meta").permissions();
    perm.set_mode(0o755);
    fs::set_permissions(path, perm).expect("chmod");
}

const FAKE_ENGINE: &str = r#"#!/bin/sh
STATE="@STATE@"
FS="@FS@"
echo "$*" >> "$STATE/calls.log"
case "$1" in
  --version)
    echo "@NAME@ version 9.9.9-fake"
    ;;
  image)
    if [ -f "$STATE/image_present" ]; then echo '[{}]'; exit 0; fi
    echo "Error: no such image" >&2
    exit 125
    ;;
  pull)
    if [ -f "$STATE/pull_fails" ]; then echo "Error: registry unreachable" >&2; exit 125; fi
    touch "$STATE/image_present"
    echo "pulled $2"
    ;;
  images)
    if [ -f "$STATE/images_fail" ]; then echo "Error: image store is locked" >&2; exit 125; fi
    if [ -f "$STATE/image_present" ]; then echo "@IMAGE_ID@"; fi
    ;;
  run)
    if [ -f "$STATE/run_fails" ]; then echo "Error: cannot start container" >&2; exit 126; fi
    name=""; detached=0; prev=""
    for a in "$@"; do
      if [ "$prev" = "--name" ]; then name="$a"; fi
      if [ "$a" = "-d" ]; then detached=1; fi
      prev="$a"
    done
    if [ "$detached" = 1 ]; then
      touch "$STATE/running.$name"
      echo "cid-$name"
      exit 0
    fi
    if [ -f "$STATE/run_hangs" ]; then
      touch "$STATE/running.$name"
      sleep 30
    fi
    echo "run-once $*"
    ;;
  exec)
    name="$2"
    if [ ! -f "$STATE/running.$name" ]; then
      echo "Error: no container with name or ID \"$name\" found" >&2
      exit 125
    fi
    if [ -e "$FS$4" ]; then echo "$4"; fi
    ;;
  cp)
    name="${2%%:*}"
    src="${2#*:}"
    if [ ! -f "$STATE/running.$name" ]; then exit 125; fi
    cp -R "$FS$src" "$3/"
    ;;
  stop)
    if [ -f "$STATE/running.$2" ]; then rm -f "$STATE/running.$2"; echo "$2"; exit 0; fi
    echo "Error: no container with name or ID \"$2\" found" >&2
    exit 125
    ;;
  rm)
    echo "Error: no container with name or ID \"$2\" found" >&2
    exit 125
    ;;
  container)
    for a in "$@"; do last="$a"; done
    if [ -f "$STATE/running.$last" ]; then echo true; exit 0; fi
    echo "Error: no such container $last" >&2
    exit 125
    ;;
esac
exit 0
"#;

pub struct FakeEngine {
    pub root: PathBuf,
    pub kind: ContainerEngine,
}

impl FakeEngine {
    pub fn install(root: &Path, kind: ContainerEngine) -> FakeEngine {
        let fe = FakeEngine {
            root: root.to_path_buf(),
            kind,
        };
        fs::create_dir_all(fe.state()).expect("state dir");
        fs::create_dir_all(fe.fs_root()).expect("fs dir");
        let script = FAKE_ENGINE
            .replace("@STATE@", &fe.state().display().to_string())
            .replace("@FS@", &fe.fs_root().display().to_string())
            .replace("@NAME@", kind.binary_name())
            .replace("@IMAGE_ID@", IMAGE_ID);
        write_executable_script(&fe.bin_dir().join(kind.binary_name()), &script);
        fe
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn state(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn fs_root(&self) -> PathBuf {
        self.root.join("fs")
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.kind, self.bin_dir().join(self.kind.binary_name()))
    }

    pub fn selector(&self) -> EngineSelector {
        EngineSelector::with_search_path(self.bin_dir())
    }

    fn flag(&self, name: &str) {
        fs::write(self.state().join(name), "").expect("flag");
    }

    pub fn set_image_present(&self) {
        self.flag("image_present");
    }

    pub fn fail_pulls(&self) {
        self.flag("pull_fails");
    }

    pub fn fail_runs(&self) {
        self.flag("run_fails");
    }

    pub fn fail_image_listing(&self) {
        self.flag("images_fail");
    }

    /// Non-detached runs register a running container and never finish on their own.
    pub fn hang_runs(&self) {
        self.flag("run_hangs");
    }

    /// Create `<container path>/doc.py` inside the fake container filesystem.
    pub fn add_dir(&self, container_path: &str) {
        let dir = self.fs_root().join(container_path.trim_start_matches('/'));
        fs::create_dir_all(&dir).expect("container dir");
        fs::write(dir.join("doc.py"), "DOCUMENTATION = ''\n").expect("doc");
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn running_containers(&self) -> Vec<String> {
        fs::read_dir(self.state())
            .expect("state")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with("running."))
            .collect()
    }
}
