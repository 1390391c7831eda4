use std::path::{Path, PathBuf};

use crate::agent_engine::engine::RunOutcome;
use crate::device::Screenshot;
use crate::errors::QaResult;

/// Writes one run's artifacts under `<results_dir>/<test_id>_<YYYYmmdd_HHMMSS>/`.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    dir: PathBuf,
    save_screenshots: bool,
}

impl RunRecorder {
    pub async fn create(results_dir: &Path, test_id: &str, save_screenshots: bool) -> QaResult<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dir = results_dir.join(format!("{}_{stamp}", sanitize(test_id)));
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "recording run");
        Ok(Self { dir, save_screenshots })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves the screenshot taken after `step` (0 = before the first action)
    /// and points the screenshot's reference at the file.
    pub async fn save_step(&self, shot: &mut Screenshot, step: u32) -> QaResult<()> {
        if !self.save_screenshots {
            return Ok(());
        }
        let path = self.dir.join(format!("step_{step:02}.{}", extension(&shot.bytes)));
        tokio::fs::write(&path, &shot.bytes).await?;
        shot.path = Some(path);
        Ok(())
    }

    pub async fn save_final(&self, shot: &Screenshot) -> QaResult<()> {
        if !self.save_screenshots {
            return Ok(());
        }
        let path = self.dir.join(format!("final.{}", extension(&shot.bytes)));
        tokio::fs::write(&path, &shot.bytes).await?;
        Ok(())
    }

    pub async fn write_result(&self, outcome: &RunOutcome) -> QaResult<PathBuf> {
        let path = self.dir.join("result.json");
        let json = serde_json::to_string_pretty(outcome)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!(path = %path.display(), "run result written");
        Ok(path)
    }
}

fn sanitize(test_id: &str) -> String {
    let cleaned: String = test_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "run".into()
    } else {
        cleaned
    }
}

fn extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "jpg",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::history::ActionHistory;
    use crate::agent_engine::state::{TestCase, Verdict};
    use crate::test_support;

    #[tokio::test]
    async fn artifacts_land_in_timestamped_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = RunRecorder::create(tmp.path(), "test 1/a", true).await.unwrap();
        let name = rec.dir().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("test_1_a_"));

        let mut shot = test_support::screenshot();
        rec.save_step(&mut shot, 3).await.unwrap();
        assert!(rec.dir().join("step_03.png").exists());
        assert!(shot.reference().ends_with("step_03.png"));

        let now = chrono::Utc::now();
        let outcome = RunOutcome {
            run_id: "r".into(),
            test_case: TestCase::from_goal("g"),
            verdict: Verdict::pass("ok"),
            history: ActionHistory::new(),
            started_at: now,
            finished_at: now,
            report_dir: None,
        };
        let path = rec.write_result(&outcome).await.unwrap();
        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["verdict"]["status"], "pass");
    }

    #[tokio::test]
    async fn screenshots_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = RunRecorder::create(tmp.path(), "t", false).await.unwrap();
        let mut shot = test_support::screenshot();
        rec.save_step(&mut shot, 1).await.unwrap();
        assert!(shot.path.is_none());
        assert_eq!(std::fs::read_dir(rec.dir()).unwrap().count(), 0);
    }
}
