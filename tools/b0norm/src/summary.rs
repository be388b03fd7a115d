//! 归一化结果的文本输出.

use dwi_berry::norm::{GroupSummary, NormReport};
use std::io::{self, Write};

const SEP: &str = "--------------------------------------------------------";
const S4: &str = "    ";

/// 最多显示的帧索引个数, 超出部分以 `...` 省略.
const MAX_LISTED: usize = 12;

#[inline]
fn frames_to_display(v: &[usize]) -> String {
    let mut s = v
        .iter()
        .take(MAX_LISTED)
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if v.len() > MAX_LISTED {
        s.push_str(", ...");
    }
    format!("[{s}]")
}

fn describe_group<W: Write>(g: &GroupSummary, frame_size: usize, w: &mut W) -> io::Result<()> {
    writeln!(w, "TE = {:.6} s:", g.echo_time)?;
    writeln!(w, "{S4}Frames: {} {}", g.frames.len(), frames_to_display(&g.frames))?;
    writeln!(
        w,
        "{S4}Baseline frames: {} {}",
        g.baselines.len(),
        frames_to_display(&g.baselines)
    )?;
    let ratio = if frame_size == 0 {
        0.0
    } else {
        g.zero_baseline_voxels as f64 / frame_size as f64 * 100.0
    };
    write!(
        w,
        "{S4}Zero baseline voxels: {} ({ratio:.2}%)",
        g.zero_baseline_voxels
    )?;
    Ok(())
}

/// 将 `report` 写进 `w` 中.
pub fn describe_into<W: Write>(report: &NormReport, w: &mut W) -> io::Result<()> {
    let (x, y, z, t) = report.shape;
    writeln!(w, "{SEP}")?;
    writeln!(w, "Shape: {x} x {y} x {z}, {t} frames")?;
    writeln!(w, "Echo time groups: {}", report.groups.len())?;
    writeln!(w, "Clamped samples: {}", report.clamped)?;
    writeln!(w, "Zero-guarded samples: {}", report.zero_guarded())?;
    for g in report.groups.iter() {
        writeln!(w, "{SEP}")?;
        describe_group(g, report.frame_size(), w)?;
        writeln!(w)?;
    }
    writeln!(w, "{SEP}")?;
    Ok(())
}
