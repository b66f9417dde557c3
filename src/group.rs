use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Label for channels no rule matches
pub const DEFAULT_CATCH_ALL: &str = "其他频道";

/// One `pattern → label` entry as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRuleSpec {
    pub pattern: String,
    pub label: String,
}

impl GroupRuleSpec {
    fn new(pattern: &str, label: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            label: label.to_string(),
        }
    }
}

/// Default rules, most specific first. Kids channels precede CCTV so CCTV14 lands there.
#[must_use]
pub fn default_rules() -> Vec<GroupRuleSpec> {
    vec![
        GroupRuleSpec::new(
            r"(CCTV-?14|哈哈炫动|卡酷|宝宝|幼教|贝瓦|巧虎|新科动漫|小猪佩奇|汪汪队|海底小纵队|米老鼠|迪士尼|熊出没|猫和老鼠|哆啦A梦|喜羊羊|青少|儿童|动画|动漫|少儿|卡通|金鹰|cartoon|disney)",
            "儿童动画",
        ),
        GroupRuleSpec::new(
            r"(央视|CCTV|CGTN|风云音乐|第一剧场|怀旧剧场|女性时尚|风云足球|世界地理|兵器科技|电视指南)",
            "央视频道",
        ),
        GroupRuleSpec::new(
            r"(卫视|湖南|浙江|江苏|北京|广东|深圳|东方|安徽|山东|河南|湖北|四川|辽宁|东南|天津|内蒙古|云南)",
            "卫视频道",
        ),
        GroupRuleSpec::new(
            r"(翡翠|明珠|凤凰|鳳凰|东森|莲花|AMC|龙华|澳亚|港台|寰宇|TVB|华语|中天|年代|民视|三立|星空|台视|美亚|美亞|千禧|无线|無線|VIUTV|HOY|RTHK|Now|靖天|星卫|香港|澳门|台湾)",
            "港澳台频道",
        ),
        GroupRuleSpec::new(r"(体育|CCTV5|高尔夫|足球|NBA|英超|西甲|欧冠|运动)", "体育频道"),
        GroupRuleSpec::new(r"(电影|影院|CHC|HBO|AXN|TCM|佳片)", "影视频道"),
        GroupRuleSpec::new(
            r"(BET|Discovery|CBS|cine|CNN|epix|espn|fox|american|boomerang|cnbc|entertainment|fuse|fx|国家地理|Animal Planet|BBC|NHK|DW|France24|Al Jazeera)",
            "国际频道",
        ),
        // Keywords only, an empty alternative would swallow the catch-all
        GroupRuleSpec::new(r"(教育|课堂|空中|大学|学习|国学|书画|考试|中学|学堂)", "教育频道"),
        // Latin-only names that nothing above claimed
        GroupRuleSpec::new(r"^[a-z0-9\s\-+&.'!()]*[a-z][a-z0-9\s\-+&.'!()]*$", "国际频道"),
    ]
}

/// Default order in which groups appear in the output playlist
#[must_use]
pub fn default_output_order() -> Vec<String> {
    [
        "央视频道",
        "卫视频道",
        "影视频道",
        "体育频道",
        "儿童动画",
        "国际频道",
        "教育频道",
        "港澳台频道",
        DEFAULT_CATCH_ALL,
    ]
    .map(String::from)
    .to_vec()
}

#[derive(Debug, Clone)]
struct GroupRule {
    pattern: Regex,
    label: String,
}

/// Ordered, case-insensitive regex rules with a catch-all label. First match wins.
#[derive(Debug, Clone)]
pub struct GroupRules {
    rules: Vec<GroupRule>,
    catch_all: String,
}

impl GroupRules {
    /// # Errors
    /// When a pattern is not a valid regex
    pub fn compile(specs: &[GroupRuleSpec], catch_all: impl Into<String>) -> Result<Self> {
        let rules = specs
            .iter()
            .map(|spec| {
                let pattern = RegexBuilder::new(&spec.pattern)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Compiling group rule for {:?}", spec.label))?;
                Ok(GroupRule {
                    pattern,
                    label: spec.label.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            catch_all: catch_all.into(),
        })
    }

    /// Label of the first rule matching `name`, or the catch-all
    #[must_use]
    pub fn classify(&self, name: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(name))
            .map_or(self.catch_all.as_str(), |rule| rule.label.as_str())
    }

    #[must_use]
    pub fn catch_all(&self) -> &str {
        &self.catch_all
    }
}

impl Default for GroupRules {
    fn default() -> Self {
        Self::compile(&default_rules(), DEFAULT_CATCH_ALL).expect("default group rules are valid")
    }
}
