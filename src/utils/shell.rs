/// Single-quotes a value for a POSIX shell command line.
pub fn escape_shell_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub fn mkdir_command(dir: &str) -> String {
    format!("mkdir -p {}", escape_shell_value(dir))
}

pub fn rmdir_command(dir: &str) -> String {
    format!("rm -rf {}", escape_shell_value(dir))
}

pub fn is_dir_command(dir: &str) -> String {
    format!(
        "if [ -d {} ]; then echo \"true\"; else echo \"false\"; fi",
        escape_shell_value(dir)
    )
}

pub fn clone_command(source: &str, target: &str) -> String {
    format!(
        "git clone --quiet {} {}",
        escape_shell_value(source),
        escape_shell_value(target)
    )
}

pub fn diff_command(path: &str) -> String {
    format!("cd {} && git diff", escape_shell_value(path))
}

pub fn apply_command(target: &str) -> String {
    format!("cd {} && git apply -", escape_shell_value(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_embedded_single_quotes() {
        assert_eq!(escape_shell_value("it's"), "'it'\\''s'");
    }

    #[test]
    fn builds_remote_commands() {
        assert_eq!(mkdir_command("/opt/idx"), "mkdir -p '/opt/idx'");
        assert_eq!(rmdir_command("/opt/idx"), "rm -rf '/opt/idx'");
        assert_eq!(
            clone_command("ssh://h/repo", "/opt/idx"),
            "git clone --quiet 'ssh://h/repo' '/opt/idx'"
        );
        assert!(is_dir_command("/x").starts_with("if [ -d '/x' ]"));
    }
}
