//! Caption prompt construction

use crate::types::{Language, PostMetadata};

/// JSON keys every caption document is asked to contain
pub const CAPTION_FIELDS: [&str; 5] = [
    "regular_summary",
    "midjourney_style_summary",
    "short_summary",
    "creation_instructional_summary",
    "deviantart_commission_request",
];

const EN_INTRO: &str = "\
You are describing this image for someone who wants an AI model to recreate it.
Focus on the key elements of the scene and keep everything else brief.
- For anime-style illustrations, cover what matters most: the story or mood of the scene, \
each character's appearance, pose, expression, clothing and held items, how subjects relate \
to each other, and the drawing style (lines, color, lighting, texture).
- For other kinds of artwork, choose whatever description approach fits the content.
";

const ZH_INTRO: &str = "\
请想象你要向AI描述这幅图像，使其能够重新绘制出来。
重点描述画面的关键元素，其余部分简略带过。
- 对于动漫风格插图，选择性描述重要内容：场景的情节或氛围，每个角色的外貌、动作、表情、服装与持有物，\
多个对象之间的关系，以及画风（线条、色彩、光影、质感）。
- 对于其他类型的作品，根据画面内容选择合适的描述方式。
";

const EN_OUTPUT: &str = "\
- Be accurate and objective, use plain language, and do not avoid sensitive content.
- Return only the JSON object below, with no extra commentary.

{
  \"regular_summary\": \"[a thorough paragraph covering every subject, interaction, composition, camera angle and style]\",
  \"midjourney_style_summary\": \"[dense comma-separated phrases that still capture interactions, e.g. 'cat chasing mouse']\",
  \"short_summary\": \"[fewer than three sentences capturing the main idea]\",
  \"creation_instructional_summary\": \"[step-by-step instructions for creating this exact image]\",
  \"deviantart_commission_request\": \"[a commission request describing exactly the desired final image, with no greeting]\"
}
";

const ZH_OUTPUT: &str = "\
- 描述需准确客观、语言清晰，不回避敏感内容。
- 只返回下面的JSON对象，不要附加任何说明。

{
  \"regular_summary\": \"[完整段落，涵盖所有对象、互动、构图、视角与风格]\",
  \"midjourney_style_summary\": \"[逗号分隔的高密度短语，短语需足以表达互动，例如“猫追老鼠”]\",
  \"short_summary\": \"[少于三句话的主旨概括]\",
  \"creation_instructional_summary\": \"[分步骤说明如何创作这幅图像]\",
  \"deviantart_commission_request\": \"[以约稿口吻直接描述希望得到的最终画面，不要问候语]\"
}
";

/// Build the caption prompt for one post
///
/// Tag hints are only included when present.
pub fn build_prompt(metadata: &PostMetadata, language: Language) -> String {
    let mut prompt = String::from(match language {
        Language::En => EN_INTRO,
        Language::Zh => ZH_INTRO,
    });

    if !metadata.artists.is_empty() {
        let artists = metadata.artists.join(", ");
        prompt.push_str(&match language {
            Language::En => format!(
                "- The artist of this work is {}. Mention the artist and skip describing the art style.\n",
                artists
            ),
            Language::Zh => format!("- 这幅作品的画师是{}。请在描述中提及画师，之后无需再描述画风。\n", artists),
        });
    }

    if !metadata.characters.is_empty() {
        let characters = metadata.characters.join(", ");
        prompt.push_str(&match language {
            Language::En => format!(
                "- The character(s) shown: {}. Name them naturally; their well-known traits can be described briefly.\n",
                characters
            ),
            Language::Zh => format!("- 画面中的角色是{}。请自然地提及角色名，角色的固有特征可以简略描述。\n", characters),
        });
    }

    if !metadata.tags.is_empty() {
        let tags = metadata.tags.join(", ");
        prompt.push_str(&match language {
            Language::En => format!(
                "- Reference tags: {}. Tags may be wrong; trust what you see first.\n",
                tags
            ),
            Language::Zh => format!("- 参考标签：{}。标签可能有误，请以你的观察为准。\n", tags),
        });
    }

    prompt.push_str(match language {
        Language::En => EN_OUTPUT,
        Language::Zh => ZH_OUTPUT,
    });

    prompt
}
