use emug_core::compile;
use miette::Report;

fn main() {
    let grammar_text = "\
Statement[Yield] :
  IfStatement[?Yield]
  `;`

IfStatement[Yield] :
  `if` `(` Expression[+In, ?Yield] `)` Statement[?Yield]

Expression[In, Yield] :
  Identifier
  [+In] Expression[+In, ?Yield] `in` Identifier

Identifier ::
  IdentifierName but not ReservedWord";

    match compile(grammar_text, Some("statement.emug"), Some(&["Statement"])) {
        Ok(grammar) => match grammar.to_json() {
            Ok(json) => println!("Compiled grammar:\n{json}"),
            Err(e) => eprintln!("Failed to serialize grammar: {e}"),
        },
        Err(e) => {
            eprintln!("{:?}", Report::new(e));
        }
    }
}
