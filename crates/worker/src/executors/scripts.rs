//! 下发到目标主机执行的 shell 脚本

use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use regex::Regex;

#[allow(clippy::expect_used)]
static FILE_MODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-7]{3,4}$").expect("constant regex pattern is valid"));

/// 用单引号包裹字符串，内部单引号按 `'"'"'` 转义
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

pub fn md5_script_name(unix_ts: i64) -> String {
    format!("bk_ges_check_config_md5_{unix_ts}.sh")
}

pub fn cat_script_name(unix_ts: i64) -> String {
    format!("bk_ges_cat_config_{unix_ts}.sh")
}

pub fn release_script_name(unix_ts: i64) -> String {
    format!("bk_ges_release_config_{unix_ts}.sh")
}

fn ensure_absolute(path: &str) -> OrchestratorResult<()> {
    if !path.starts_with('/') {
        return Err(OrchestratorError::payload(format!(
            "config file path must be absolute: {path}"
        )));
    }
    Ok(())
}

fn target_script(target_path: &str, command: &str) -> OrchestratorResult<String> {
    ensure_absolute(target_path)?;
    Ok(format!(
        "#!/bin/bash\nset -euo pipefail\n\nTARGET_PATH={}\n\n{}\n",
        shell_quote(target_path),
        command
    ))
}

/// 输出目标文件的 md5
pub fn md5_script(target_path: &str) -> OrchestratorResult<String> {
    target_script(target_path, r#"md5sum "$TARGET_PATH" | awk '{print $1}'"#)
}

/// 输出目标文件的完整内容
pub fn cat_script(target_path: &str) -> OrchestratorResult<String> {
    target_script(target_path, r#"cat "$TARGET_PATH""#)
}

/// 权限位必须是 3~4 位八进制数字
pub fn is_valid_permission(permission: &str) -> bool {
    FILE_MODE_PATTERN.is_match(permission)
}

/// 通过脚本直接写入配置文件，并设置属主与权限
pub fn release_script(
    target_path: &str,
    content: &[u8],
    owner: &str,
    group: &str,
    permission: &str,
) -> OrchestratorResult<String> {
    ensure_absolute(target_path)?;
    if !is_valid_permission(permission) {
        return Err(OrchestratorError::payload(format!(
            "invalid config file permission: {permission}"
        )));
    }

    let mut script = format!(
        "#!/bin/bash\nset -euo pipefail\n\nTARGET_PATH={}\n\nmkdir -p \"$(dirname \"$TARGET_PATH\")\"\necho {} | base64 -d > \"$TARGET_PATH\"\nchmod {} \"$TARGET_PATH\"\n",
        shell_quote(target_path),
        shell_quote(&STANDARD.encode(content)),
        permission
    );
    if !owner.is_empty() {
        let ownership = if group.is_empty() {
            owner.to_string()
        } else {
            format!("{owner}:{group}")
        };
        script.push_str(&format!(
            "chown {} \"$TARGET_PATH\"\n",
            shell_quote(&ownership)
        ));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/etc/app.conf"), "'/etc/app.conf'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }

    #[test]
    fn test_md5_script_body() {
        let script = md5_script("/data/app/config_2.yaml").unwrap();
        assert_eq!(
            script,
            "#!/bin/bash\nset -euo pipefail\n\nTARGET_PATH='/data/app/config_2.yaml'\n\nmd5sum \"$TARGET_PATH\" | awk '{print $1}'\n"
        );
        assert!(cat_script("/a/b").unwrap().contains("cat \"$TARGET_PATH\""));
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(md5_script("conf/app.yaml").is_err());
        assert!(release_script("conf/app.yaml", b"x", "root", "root", "0644").is_err());
    }

    #[test]
    fn test_script_names() {
        assert_eq!(md5_script_name(100), "bk_ges_check_config_md5_100.sh");
        assert_eq!(cat_script_name(100), "bk_ges_cat_config_100.sh");
    }

    #[test]
    fn test_release_script() {
        let script = release_script("/etc/app.conf", b"port=80\n", "app", "users", "0644").unwrap();
        assert!(script.contains("echo 'cG9ydD04MAo=' | base64 -d > \"$TARGET_PATH\""));
        assert!(script.contains("chmod 0644 \"$TARGET_PATH\""));
        assert!(script.contains("chown 'app:users' \"$TARGET_PATH\""));

        assert!(!is_valid_permission("0888"));
        assert!(!is_valid_permission("64"));
        assert!(is_valid_permission("755"));
        assert!(!is_valid_permission("06444"));
        assert!(!is_valid_permission("644\n"));
        assert!(release_script("/etc/app.conf", b"", "app", "", "rw").is_err());
    }
}
