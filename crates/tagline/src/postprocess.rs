use crate::config::PostprocessConfig;

/// Normalizes raw model output into a caption line.
///
/// The transform is pure and infallible: any input yields a (possibly empty) string.
#[derive(Debug, Clone, Default)]
pub struct CaptionPostprocessor {
    config: PostprocessConfig,
}

impl CaptionPostprocessor {
    pub fn new(config: PostprocessConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &PostprocessConfig {
        &self.config
    }

    /// Normalize a raw caption.
    ///
    /// # Arguments
    ///
    /// * `raw` - The decoded model output.
    ///
    /// # Returns
    ///
    /// The caption with role scaffolding and banned words removed, delimiters unified
    /// and the length capped at segment granularity.
    ///
    /// # Example
    ///
    /// ```
    /// use tagline::postprocess::CaptionPostprocessor;
    ///
    /// let postprocessor = CaptionPostprocessor::default();
    /// let caption = postprocessor.normalize("assistant\n一只橘猫，趴在木桌上；自然光。");
    ///
    /// assert_eq!(caption, "一只橘猫,趴在木桌上,自然光");
    /// ```
    pub fn normalize(&self, raw: &str) -> String {
        let sep = self.config.separator;

        let text = self.strip_role(raw);
        let text = unify_delimiters(text, sep);
        let text = self.remove_banned(text);

        let segments = text
            .split(sep)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let joined = segments.join(&sep.to_string());
        let too_long = joined.chars().count() > self.config.max_chars;
        let too_many = segments.len() > self.config.max_segments;

        if !(too_long || too_many) {
            return trim_tail(&joined, sep).to_string();
        }

        let kept = segments
            .iter()
            .take(self.config.max_segments)
            .copied()
            .collect::<Vec<_>>()
            .join(&sep.to_string());
        let kept = trim_tail(&kept, sep);

        if kept.is_empty() {
            return String::new();
        }

        format!("{kept}{}", self.config.ellipsis)
    }

    fn strip_role<'a>(&self, raw: &'a str) -> &'a str {
        let marker = self.config.role_marker.as_str();
        if marker.is_empty() {
            return raw;
        }
        match raw.rfind(marker) {
            Some(pos) => raw[pos + marker.len()..].trim(),
            None => raw,
        }
    }

    // removal can glue two halves into a new banned word, so iterate to a fixpoint
    fn remove_banned(&self, mut text: String) -> String {
        loop {
            let before = text.len();
            for word in self.config.banned_words.iter().filter(|w| !w.is_empty()) {
                if text.contains(word.as_str()) {
                    text = text.replace(word.as_str(), "");
                }
            }
            if text.len() == before {
                return text;
            }
        }
    }
}

fn unify_delimiters(text: &str, sep: char) -> String {
    text.chars()
        .filter_map(|c| match c {
            '，' | '、' | '；' | ';' => Some(sep),
            '。' => None,
            other => Some(other),
        })
        .collect()
}

fn trim_tail(text: &str, sep: char) -> &str {
    text.trim_end_matches(|c: char| c == sep || c == '.' || c.is_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn postprocessor() -> CaptionPostprocessor {
        CaptionPostprocessor::default()
    }

    #[test]
    fn strips_everything_up_to_last_role_marker() {
        let raw = "system\n规则\nuser\n描述图片\nassistant\n一位青年男性，短发";
        assert_eq!(postprocessor().normalize(raw), "一位青年男性,短发");
    }

    #[test]
    fn removes_banned_words() {
        let config = postprocessor().config().clone();
        let raw = "一位美丽的女性，非常优雅，身穿精致的红色长裙，时尚质感";
        let caption = postprocessor().normalize(raw);

        for word in &config.banned_words {
            assert!(!caption.contains(word.as_str()), "{word} left in {caption}");
        }
        assert_eq!(caption, "一位的女性,身穿的红色长裙");
    }

    #[test]
    fn removal_does_not_leave_glued_banned_words() {
        // "可" + "美丽" + "爱" collapses into "可爱" after the first pass
        let caption = postprocessor().normalize("一只可美丽爱的小狗");
        assert_eq!(caption, "一只的小狗");

        // a dropped full-width period must not glue a banned word either
        let caption = postprocessor().normalize("一只猫，美。丽的花纹");
        assert_eq!(caption, "一只猫,的花纹");
    }

    #[test]
    fn unifies_delimiters() {
        let raw = "红色外套，黑色长裤、白色运动鞋；站在街道上;阴天。";
        let caption = postprocessor().normalize(raw);

        assert_eq!(caption, "红色外套,黑色长裤,白色运动鞋,站在街道上,阴天");
        for c in ['，', '、', '；', '。', ';'] {
            assert!(!caption.contains(c));
        }
    }

    #[test]
    fn trims_whitespace_and_empty_segments() {
        let caption = postprocessor().normalize("  山峰 ,, 云海 ，  ，晨光 . ");
        assert_eq!(caption, "山峰,云海,晨光");
    }

    #[test]
    fn truncates_to_first_segments_with_ellipsis() {
        let raw = (1..=20)
            .map(|i| format!("第{i}个视觉要素"))
            .collect::<Vec<_>>()
            .join("，");
        let caption = postprocessor().normalize(&raw);

        assert!(caption.ends_with("..."));
        let body = caption.trim_end_matches("...");
        let segments = body.split(',').collect::<Vec<_>>();
        assert_eq!(segments.len(), 12);
        assert_eq!(segments[0], "第1个视觉要素");
        assert_eq!(segments[11], "第12个视觉要素");
    }

    #[test]
    fn truncates_many_short_segments() {
        let raw = (0..13).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        let caption = postprocessor().normalize(&raw);
        assert_eq!(caption, "0,1,2,3,4,5,6,7,8,9,10,11...");
    }

    #[test]
    fn long_caption_with_few_segments_gets_ellipsis() {
        let long = "长".repeat(150);
        let raw = format!("{long}，{long}");
        let caption = postprocessor().normalize(&raw);
        assert_eq!(caption, format!("{long},{long}..."));
    }

    #[test]
    fn short_caption_is_untouched() {
        let caption = postprocessor().normalize("桌上的白色陶瓷杯,近景,真实拍摄");
        assert_eq!(caption, "桌上的白色陶瓷杯,近景,真实拍摄");
    }

    #[test]
    fn empty_and_degenerate_inputs() {
        assert_eq!(postprocessor().normalize(""), "");
        assert_eq!(postprocessor().normalize("assistant"), "");
        assert_eq!(postprocessor().normalize("，。、；"), "");
        assert_eq!(postprocessor().normalize("美丽可爱"), "");
    }

    #[test]
    fn custom_separator() {
        let config = PostprocessConfig {
            separator: '|',
            ..Default::default()
        };
        let caption = CaptionPostprocessor::new(config).normalize("一棵树，一条河");
        assert_eq!(caption, "一棵树|一条河");
    }
}
