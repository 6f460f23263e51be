//! Reading a paper's front matter: heading classification, the boundary
//! scan, and section extraction.

pub mod extract;
pub mod headings;
pub mod sections;
