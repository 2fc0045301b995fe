use std::collections::HashMap;

use crate::Error;
use indoc::indoc;
use subst::substitute;

const CLASSIFY_PDF: &str = indoc! {"
  You are classifying a PDF document published by an equipment manufacturer.

  Decide which one of the following document types it is:
  - Product Data Sheet
  - Specification Sheet
  - Submittal Sheet
  - Technical Data Sheet
  - Installation Manual
  - Operation & Maintenance
  - Engineering Diagram
  - Marketing
  - Unknown

  Filename:
  <filename>
  ${FILENAME}
  </filename>

  First page of the document's extracted text (may be empty if extraction failed):
  <first_page>
  ${FIRST_PAGE}
  </first_page>

  Respond with a single JSON object and nothing else:
  {\"document_type\": \"<one of the types above>\", \"confidence\": <number between 0 and 1>}
"};

pub fn prompt_classify_pdf(filename: &str, first_page: &str) -> Result<String, Error> {
    let res = substitute(CLASSIFY_PDF, &{
        let mut v = HashMap::new();
        v.insert("FILENAME".to_string(), filename.to_string());
        v.insert("FIRST_PAGE".to_string(), first_page.to_string());
        v
    })?;
    Ok(res)
}
