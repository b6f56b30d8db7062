//! Model prompts for extraction, canonicalization, and analysis.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction schema or the
//!    merge rules requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real model, making prompt regressions easy to
//!    catch.

use crate::canon::LabelCategory;

/// System prompt for per-page structured extraction.
///
/// The JSON shape it demands is the wire form of
/// [`crate::record::ExtractionRecord`]; the two must stay in sync.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert OCR and document analysis system.
Extract ALL text from the image in READING ORDER to create a digital twin of the document.

IMPORTANT: Transcribe text exactly as it appears on the page, from top to bottom, left to right, including:
- All printed text
- All handwritten text (inline where it appears)
- Stamps and annotations (inline where they appear)
- Signatures (note location)

Preserve the natural reading flow. Mix printed and handwritten text together in the order they appear.

Return ONLY valid JSON in this exact structure:
{
  "document_metadata": {
    "page_number": "string or null",
    "document_number": "string or null",
    "date": "string or null",
    "document_type": "string or null",
    "has_handwriting": true/false,
    "has_stamps": true/false
  },
  "full_text": "Complete text transcription in reading order. Include ALL text - printed, handwritten, stamps, etc. - exactly as it appears from top to bottom.",
  "text_blocks": [
    {
      "type": "printed|handwritten|stamp|signature|other",
      "content": "text content",
      "position": "top|middle|bottom|header|footer|margin"
    }
  ],
  "entities": {
    "people": ["list of person names"],
    "organizations": ["list of organizations"],
    "locations": ["list of locations"],
    "dates": ["list of dates found"],
    "reference_numbers": ["list of any reference/ID numbers"]
  },
  "additional_notes": "Any observations about document quality, redactions, damage, etc."
}"#;

/// The fixed user instruction sent alongside each page image.
pub const EXTRACTION_USER_PROMPT: &str =
    "Extract all text and entities from this image. Return only valid JSON.";

/// Correction instruction for repair mode. The original request and broken
/// assistant reply are replayed before this turn.
pub fn repair_instruction(error: &str) -> String {
    format!(
        "Your JSON response has an error: {error}\n\n\
         Please fix the JSON and return ONLY the corrected valid JSON. \
         Do not explain, just return the fixed JSON."
    )
}

/// System prompt for per-batch entity grouping proposals.
///
/// Asks for `{canonical: [variants]}` groups; the engine validates every
/// proposed canonical afterwards, so the prompt leans on examples rather
/// than trying to be airtight.
pub fn entity_grouping_prompt(category: LabelCategory) -> String {
    let examples = match category {
        LabelCategory::People => {
            r#"Examples:
{
  "Jeffrey Epstein": ["Jeffrey Epstein", "JEFFREY EPSTEIN", "Epstein", "EPSTEIN", "J. Epstein", "Jeffrey E. Epstein", "J Epstein", "Jeffery Epstein", "Mr. Epstein", "Jeffrey E.", "Epstein's"],
  "Ghislaine Maxwell": ["Ghislaine Maxwell", "GHISLAINE MAXWELL", "Maxwell", "G. Maxwell", "Ghislane Maxwell", "Ghislain Maxwell", "Ms. Maxwell"],
  "Bill Clinton": ["Bill Clinton", "BILL CLINTON", "Clinton", "William Clinton", "William J. Clinton", "President Clinton", "William Jefferson Clinton"]
}

WRONG EXAMPLES (DO NOT DO THIS):
{
  "Mr. Epstein's brother": ["Jeffrey Epstein", "Epstein"] // WRONG - use actual name
  "The President": ["Bill Clinton"] // WRONG - use actual name
  "Plaintiff's attorney": ["John Smith"] // WRONG - use actual name
}"#
        }
        LabelCategory::Organizations => {
            r#"Examples:
{
  "Federal Bureau of Investigation": ["Federal Bureau of Investigation", "FBI", "F.B.I.", "FEDERAL BUREAU OF INVESTIGATION"],
  "United States District Court": ["United States District Court", "U.S. District Court", "USDC", "District Court"]
}"#
        }
        _ => {
            r#"Examples:
{
  "New York City": ["New York City", "NEW YORK CITY", "NYC", "New York", "New York, NY", "Manhattan"],
  "Palm Beach": ["Palm Beach", "PALM BEACH", "Palm Beach, Florida", "Palm Beach, FL"]
}"#
        }
    };

    let noun = category.noun();
    format!(
        r#"You are an expert at identifying and merging duplicate entities in scanned documents.

Given a list of {noun}, identify which names refer to the same entity and group them under their canonical name.

CRITICAL RULES FOR CANONICAL NAMES:
- The canonical name MUST be an actual proper name, never a descriptive phrase, a title alone, a possessive form, or a role word
- Case, punctuation, and whitespace differences are ALWAYS the same identity
- Prefer the most complete form of the actual name
- Merge OCR spelling variations
- Numbered identities (e.g. "Witness 1", "Witness 2") are DIFFERENT entities and must never be merged with each other
- Every entity must appear in exactly one group; include the canonical name itself in its variants array

{examples}

Return ONLY valid JSON with NO extra text, markdown, or explanations."#
    )
}

/// User turn listing one batch of raw labels for grouping.
pub fn entity_batch_request(category: LabelCategory, batch: &[String]) -> String {
    let mut body = format!("Identify duplicates in this list of {}:\n\n", category.noun());
    for label in batch {
        body.push_str("- ");
        body.push_str(label);
        body.push('\n');
    }
    body
}

/// Single-turn prompt for one batch of document-type labels.
///
/// Unlike the entity prompt this asks for a flat `{original: canonical}`
/// mapping — document types have no variant lists worth keeping.
pub fn type_batch_prompt(types: &[String]) -> String {
    let listing = serde_json::to_string_pretty(types).unwrap_or_default();
    format!(
        r#"You are a document classifier. Your task is to group similar document type labels into standardized canonical types.

RULES:
1. The canonical type MUST be a clean, professional document type name in title case (e.g. "Deposition", "Court Filing", "Email")
2. Merge variations that mean the same thing: "deposition", "DEPOSITION", "deposition transcript", "dep" all map to "Deposition"
3. Common canonical types to use: Deposition, Court Filing, Letter, Email, Affidavit, Motion, Subpoena, Flight Log, Financial Record, Contract, Memorandum, Transcript, Exhibit, Declaration, Report, Unknown (only if truly unidentifiable)
4. Be generous with merging - if types are similar, merge them
5. Prefer shorter, cleaner canonical names

Here are the document types to deduplicate:

{listing}

Return ONLY valid JSON in this exact format:
{{
  "document_type_1": "Canonical Type",
  "document_type_2": "Canonical Type"
}}

Map every input type to its canonical form. If a type is already clean, map it to itself."#
    )
}

/// Single-turn prompt for the cross-batch convergence pass.
///
/// Stricter than the batch prompts: the inputs are already canonical, so the
/// model is told to merge only clear duplicates and to prefer the shorter
/// label.
pub fn convergence_prompt(canonicals: &[String]) -> String {
    let listing = serde_json::to_string_pretty(canonicals).unwrap_or_default();
    format!(
        r#"You are performing a FINAL CLEANUP pass on canonical labels produced by independent batches.

RULES:
1. These are ALREADY canonical labels, so be conservative
2. ONLY merge if two labels are truly the same underlying identity with different names
3. DO NOT merge labels that are legitimately different things
4. Prefer the SHORTER, simpler label when merging
5. If a label is already perfect, map it to itself

Here are the labels to review (sorted alphabetically):

{listing}

Return ONLY valid JSON mapping each label to its final canonical form:
{{
  "Label 1": "Final Label",
  "Label 2": "Final Label"
}}"#
    )
}

/// System prompt for whole-document analysis.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert document analyst specializing in court documents, depositions, and filings.

Analyze the provided document and return a concise summary with key insights.

Your analysis should include:
1. **Document Type**: What kind of document is this? (deposition, court filing, letter, email, affidavit, etc.)
2. **Key Topics**: What are the main subjects/topics discussed? (2-3 bullet points)
3. **Key People**: Who are the most important people mentioned and their roles?
4. **Significance**: Why is this document potentially important? What does it reveal or establish?
5. **Summary**: A 2-3 sentence summary of the document's content

Be factual, concise, and focus on what makes this document notable or significant.

Return ONLY valid JSON in this format:
{
  "document_type": "string",
  "key_topics": ["topic1", "topic2", "topic3"],
  "key_people": [
    {"name": "person name", "role": "their role or significance in this doc"}
  ],
  "significance": "Why this document matters (1-2 sentences)",
  "summary": "Brief summary (2-3 sentences)"
}"#;
